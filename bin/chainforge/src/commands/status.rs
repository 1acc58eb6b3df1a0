// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `status`: cluster health rendering.

use crate::{context::CommandContext, output::CommandOutput};
use cf_cluster::Devnet;
use cf_types::{aggregate, ForgeResult};

pub async fn run(ctx: &CommandContext) -> ForgeResult<CommandOutput> {
    let devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;
    let nodes = devnet.health().await?;
    let status = aggregate(&nodes);
    Ok(CommandOutput::Status {
        status,
        display: status.user_facing().to_string(),
        chain_id: devnet.metadata().chain_id.clone(),
        version: devnet.metadata().current_version.clone(),
        nodes,
    })
}
