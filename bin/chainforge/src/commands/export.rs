// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `export`, `export list`, `export inspect`, `export-keys`.

use crate::{
    cli::{ExportAction, ExportArgs},
    context::CommandContext,
    output::{CommandOutput, ExportListEntry},
};
use cf_cluster::{export_keys, inspect_export, list_exports, Devnet};
use cf_config::load_json;
use cf_types::ForgeResult;

pub async fn run(ctx: &CommandContext, args: ExportArgs) -> ForgeResult<CommandOutput> {
    match args.action {
        Some(ExportAction::List) => {
            let exports = list_exports(&ctx.dirs)?
                .into_iter()
                .map(|(timestamp, record)| ExportListEntry { timestamp, record })
                .collect();
            Ok(CommandOutput::ExportList { exports })
        }
        Some(ExportAction::Inspect { timestamp }) => {
            let record = inspect_export(&ctx.dirs, timestamp)?;
            Ok(CommandOutput::ExportInspect { timestamp, record })
        }
        None => {
            let mut devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;
            let path = devnet.export_genesis(&args.label).await?;
            let record = load_json(&cf_cluster::export_metadata_path(&path))?
                .expect("export just wrote its metadata");
            Ok(CommandOutput::Export { path, record })
        }
    }
}

pub async fn keys(ctx: &CommandContext) -> ForgeResult<CommandOutput> {
    let devnet = Devnet::open(ctx.store(), ctx.plugin()?)?;
    let keys = export_keys(&devnet.metadata().chain_id, devnet.nodes())?;
    Ok(CommandOutput::Keys { keys })
}
