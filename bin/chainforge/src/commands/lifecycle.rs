// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `start`, `stop`, `restart` over an existing cluster.

use crate::{cli::StartArgs, context::CommandContext, output::CommandOutput};
use cf_cluster::Devnet;
use cf_types::ForgeResult;

pub async fn start(ctx: &CommandContext, args: StartArgs) -> ForgeResult<CommandOutput> {
    let mut devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;
    devnet.start_all(args.health_timeout, &ctx.cancel).await?;
    Ok(CommandOutput::Lifecycle {
        action: "started".into(),
        chain_id: devnet.metadata().chain_id.clone(),
    })
}

pub async fn stop(ctx: &CommandContext) -> ForgeResult<CommandOutput> {
    let mut devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;
    devnet.stop_all().await?;
    Ok(CommandOutput::Lifecycle {
        action: "stopped".into(),
        chain_id: devnet.metadata().chain_id.clone(),
    })
}

pub async fn restart(ctx: &CommandContext, args: StartArgs) -> ForgeResult<CommandOutput> {
    let mut devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;
    devnet.stop_all().await?;
    devnet.start_all(args.health_timeout, &ctx.cancel).await?;
    Ok(CommandOutput::Lifecycle {
        action: "restarted".into(),
        chain_id: devnet.metadata().chain_id.clone(),
    })
}
