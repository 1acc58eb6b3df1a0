// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `destroy`: remove the cluster, optionally the cache.

use crate::{cli::DestroyArgs, context::CommandContext, output::CommandOutput};
use cf_cluster::Devnet;
use cf_types::{ForgeError, ForgeResult};

pub async fn run(ctx: &CommandContext, args: DestroyArgs) -> ForgeResult<CommandOutput> {
    if !args.force {
        return Err(ForgeError::precondition_with_hint(
            "destroy removes the devnet permanently",
            "re-run with --force to confirm",
        ));
    }

    let devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;
    devnet.destroy().await?;

    if args.purge_cache {
        ctx.cache().purge()?;
    }
    Ok(CommandOutput::Destroy { purged_cache: args.purge_cache })
}
