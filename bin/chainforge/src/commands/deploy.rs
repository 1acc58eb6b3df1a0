// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `deploy`: provision a devnet and bring it up.

use crate::{cli::DeployArgs, context::CommandContext, output::CommandOutput};
use cf_build::{BuildCoordinator, BuildProgress, BuildRequest, GitMakeBuilder};
use cf_cluster::{Devnet, ProvisionSpec};
use cf_types::{ExecutionMode, ForgeError, ForgeResult};
use tokio::sync::mpsc;
use tracing::info;

pub async fn run(ctx: &CommandContext, args: DeployArgs) -> ForgeResult<CommandOutput> {
    let plugin = ctx.plugin()?;
    let mode = if args.container { ExecutionMode::Container } else { ExecutionMode::Local };

    // resolve what the nodes will run before provisioning anything
    let image = match (mode, &args.image, &args.version) {
        (ExecutionMode::Container, Some(image), _) => Some(image.clone()),
        (ExecutionMode::Container, None, Some(version)) => {
            Some(plugin.image(args.network, version))
        }
        (ExecutionMode::Container, None, None) => {
            return Err(ForgeError::precondition_with_hint(
                "container mode needs --image or --version",
                "pass --image registry/chain:tag, or --version v1.2.3",
            ));
        }
        (ExecutionMode::Local, ..) => None,
    };

    let spec = ProvisionSpec {
        chain_id: args.chain_id.clone(),
        network: args.network,
        validators: args.validators,
        accounts: args.accounts,
        mode,
        image: image.clone(),
        binary_path: args.binary.clone(),
    };
    let mut devnet = Devnet::provision(ctx.store(), plugin.clone(), spec)?;

    // version bookkeeping: the image tag, the built ref, or the custom
    // binary's probe is the initial version
    let version = match mode {
        ExecutionMode::Container => args.version.clone().or_else(|| {
            image.as_deref().and_then(|i| i.rsplit_once(':').map(|(_, tag)| tag.to_string()))
        }),
        ExecutionMode::Local => {
            if args.binary.is_none() {
                let reference = args.version.clone().ok_or_else(|| {
                    ForgeError::precondition_with_hint(
                        "local mode needs --version or --binary",
                        "pass --version v1.2.3 (built from source) or --binary /path/to/bin",
                    )
                })?;
                let coordinator = BuildCoordinator::new(ctx.cache(), GitMakeBuilder::default());
                let (tx, rx) = mpsc::channel(64);
                let renderer = spawn_build_renderer(rx);
                let output = coordinator
                    .obtain(
                        plugin.as_ref(),
                        &BuildRequest {
                            network: args.network,
                            reference: reference.clone(),
                            to_cache: true,
                            activate: true,
                        },
                        &tx,
                    )
                    .await?;
                drop(tx);
                let _ = renderer.await;
                info!(target: "forge::cli", path = %output.path.display(), "binary ready");
                Some(reference)
            } else {
                args.version.clone()
            }
        }
    };
    if let Some(version) = &version {
        devnet.set_initial_version(version)?;
    }

    if mode == ExecutionMode::Local {
        devnet.init_nodes().await?;
    }
    devnet.start_all(args.health_timeout, &ctx.cancel).await?;

    let rpc_endpoints = devnet
        .nodes()
        .iter()
        .map(|n| format!("http://127.0.0.1:{}", n.ports.rpc))
        .collect();

    Ok(CommandOutput::Deploy {
        chain_id: args.chain_id,
        validators: args.validators,
        mode: mode.to_string(),
        version,
        rpc_endpoints,
    })
}

/// Forward build progress to the log until the channel closes.
pub(crate) fn spawn_build_renderer(
    mut rx: mpsc::Receiver<BuildProgress>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                BuildProgress::Resolving { reference } => {
                    info!(target: "forge::cli", reference, "resolving")
                }
                BuildProgress::CacheHit { path } => {
                    info!(target: "forge::cli", path = %path.display(), "cache hit")
                }
                BuildProgress::Building { step } => info!(target: "forge::cli", step, "building"),
                BuildProgress::Built { path } => {
                    info!(target: "forge::cli", path = %path.display(), "built")
                }
                BuildProgress::Activated { pointer } => {
                    info!(target: "forge::cli", pointer = %pointer.display(), "activated")
                }
            }
        }
    })
}
