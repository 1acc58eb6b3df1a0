// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `node start|stop|logs <index>`.

use crate::{cli::NodeCommand, context::CommandContext, output::CommandOutput};
use cf_cluster::Devnet;
use cf_process::tail_log;
use cf_types::{ExecutionMode, ForgeError, ForgeResult};

pub async fn run(ctx: &CommandContext, command: NodeCommand) -> ForgeResult<CommandOutput> {
    let mut devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;

    match command {
        NodeCommand::Start { index } => {
            devnet.start_node(index).await?;
            Ok(CommandOutput::NodeLifecycle { index, action: "started".into() })
        }
        NodeCommand::Stop { index } => {
            devnet.stop_node(index).await?;
            Ok(CommandOutput::NodeLifecycle { index, action: "stopped".into() })
        }
        NodeCommand::Logs { index, lines } => {
            let node = devnet
                .nodes()
                .get(index)
                .ok_or_else(|| ForgeError::precondition(format!("no node {index}")))?
                .clone();
            let tail = match devnet.metadata().mode {
                ExecutionMode::Local => tail_log(&node.log_path(), lines)?,
                ExecutionMode::Container => {
                    let name = node.container_name.clone().ok_or_else(|| {
                        ForgeError::precondition(format!("node {index} was never started"))
                    })?;
                    devnet.container_logs(&name, lines).await?
                }
            };
            Ok(CommandOutput::NodeLogs { index, lines: tail })
        }
    }
}
