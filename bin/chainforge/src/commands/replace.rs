// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `replace`: swap the running binary without governance.

use crate::{
    cli::ReplaceArgs, commands::deploy::spawn_build_renderer, context::CommandContext,
    output::CommandOutput,
};
use cf_build::{BuildCoordinator, BuildRequest, GitMakeBuilder};
use cf_cluster::Devnet;
use cf_types::{ExecutionMode, ForgeError, ForgeResult};
use tokio::sync::mpsc;
use tracing::info;

pub async fn run(ctx: &CommandContext, args: ReplaceArgs) -> ForgeResult<CommandOutput> {
    let plugin = ctx.plugin()?;
    let mut devnet = Devnet::open(ctx.store(), plugin.clone())?;

    if devnet.metadata().mode != ExecutionMode::Local {
        return Err(ForgeError::precondition_with_hint(
            "replace swaps local binaries; container devnets upgrade via --image",
            "use `chainforge upgrade --image <ref>` instead",
        ));
    }

    // resolve the new binary first; the cluster keeps running during the
    // build and only stops for the swap
    let (path, cache_ref, version) = match (&args.binary, &args.version) {
        (Some(path), _) => {
            let version = args
                .version
                .clone()
                .unwrap_or_else(|| path.display().to_string());
            (path.clone(), "external".to_string(), version)
        }
        (None, Some(reference)) => {
            let coordinator = BuildCoordinator::new(ctx.cache(), GitMakeBuilder::default());
            let (tx, rx) = mpsc::channel(64);
            let renderer = spawn_build_renderer(rx);
            let output = coordinator
                .obtain(
                    plugin.as_ref(),
                    &BuildRequest {
                        network: devnet.metadata().network,
                        reference: reference.clone(),
                        to_cache: true,
                        activate: false,
                    },
                    &tx,
                )
                .await?;
            drop(tx);
            let _ = renderer.await;
            (output.path, output.cache_ref, reference.clone())
        }
        (None, None) => {
            return Err(ForgeError::precondition_with_hint(
                "replace needs a target",
                "pass --version <tag-or-ref> or --binary <path>",
            ));
        }
    };

    devnet.stop_all().await?;
    ctx.cache().activate(plugin.binary_name(), &path)?;
    info!(target: "forge::cli", path = %path.display(), "active pointer swapped");
    devnet.start_all(args.health_timeout, &ctx.cancel).await?;

    // the exact requested string becomes the recorded version
    devnet.advance_version(&version, None)?;

    Ok(CommandOutput::Replace { version, cache_ref })
}
