// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `reset --soft|--hard`.

use crate::{cli::ResetArgs, context::CommandContext, output::CommandOutput};
use cf_cluster::Devnet;
use cf_types::{ForgeError, ForgeResult};

pub async fn run(ctx: &CommandContext, args: ResetArgs) -> ForgeResult<CommandOutput> {
    let mut devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;

    if args.hard {
        if !args.force {
            return Err(ForgeError::precondition_with_hint(
                "a hard reset removes the devnet root",
                "re-run with --force to confirm",
            ));
        }
        devnet.reset_hard().await?;
        return Ok(CommandOutput::Reset { hard: true });
    }

    devnet.reset_soft().await?;
    Ok(CommandOutput::Reset { hard: false })
}
