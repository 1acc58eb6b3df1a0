// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Argument parsing and the command entry point.

use crate::{
    commands,
    context::CommandContext,
    output::{render_error, CommandOutput},
};
use cf_types::{ForgeError, ForgeResult, NetworkSource};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::{path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chainforge", version, about = "Local multi-node devnet builder")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Home directory (default: ~/.chainforge).
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,
    /// Emit results as a single JSON object.
    #[arg(long, global = true)]
    pub json: bool,
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Disable colored log output.
    #[arg(long, global = true)]
    pub no_color: bool,
    /// Blockchain family to operate on.
    #[arg(long, global = true, default_value = "demo")]
    pub family: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision a devnet and start it.
    Deploy(DeployArgs),
    /// Start all nodes of the existing devnet.
    Start(StartArgs),
    /// Stop all nodes.
    Stop,
    /// Stop then start all nodes.
    Restart(StartArgs),
    /// Show cluster health.
    Status,
    /// Remove the devnet (and optionally the binary cache).
    Destroy(DestroyArgs),
    /// Discard chain data, keeping (soft) or removing (hard) configuration.
    Reset(ResetArgs),
    /// Run a governance-driven binary upgrade.
    Upgrade(UpgradeArgs),
    /// Swap the binary without governance.
    Replace(ReplaceArgs),
    /// Per-node controls.
    #[command(subcommand)]
    Node(NodeCommand),
    /// State exports.
    Export(ExportArgs),
    /// Dump validator and node keys as JSON.
    ExportKeys,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Chain id for the new devnet.
    #[arg(long, default_value = "forge-1")]
    pub chain_id: String,
    /// Number of validator nodes.
    #[arg(long, default_value_t = 4)]
    pub validators: usize,
    /// Number of funded extra accounts.
    #[arg(long, default_value_t = 0)]
    pub accounts: usize,
    /// Source network seeding the devnet.
    #[arg(long, default_value = "testnet")]
    pub network: NetworkSource,
    /// Run nodes as containers instead of local processes.
    #[arg(long)]
    pub container: bool,
    /// Container image reference (container mode).
    #[arg(long)]
    pub image: Option<String>,
    /// Version tag or git ref to build and run (local mode).
    #[arg(long)]
    pub version: Option<String>,
    /// Use this pre-built binary instead of building.
    #[arg(long)]
    pub binary: Option<PathBuf>,
    /// How long to wait for all nodes to report healthy.
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub health_timeout: Duration,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub health_timeout: Duration,
}

#[derive(Debug, Args)]
pub struct DestroyArgs {
    /// Required: destruction is not prompted for.
    #[arg(long)]
    pub force: bool,
    /// Also delete the shared binary cache.
    #[arg(long)]
    pub purge_cache: bool,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Remove the devnet root instead of just chain data.
    #[arg(long, conflicts_with = "soft")]
    pub hard: bool,
    /// Discard chain data but keep configuration (default).
    #[arg(long)]
    pub soft: bool,
    /// Required for --hard.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct UpgradeArgs {
    /// On-chain upgrade handler name (must be unique among accepted
    /// proposals).
    #[arg(long)]
    pub name: String,
    /// Version the devnet runs after the upgrade.
    #[arg(long)]
    pub version: String,
    /// Upgrade to this container image.
    #[arg(long, conflicts_with = "binary")]
    pub image: Option<String>,
    /// Upgrade to this pre-built binary.
    #[arg(long)]
    pub binary: Option<PathBuf>,
    /// Override the chain's expedited voting period.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub voting_period: Option<Duration>,
    /// Blocks of headroom after voting ends; 0 derives it from the
    /// measured block time.
    #[arg(long, default_value_t = 0)]
    pub height_buffer: u64,
    /// Capture genesis exports before and after the upgrade.
    #[arg(long)]
    pub export_genesis: bool,
}

#[derive(Debug, Args)]
pub struct ReplaceArgs {
    /// Version tag or git ref to build and swap in.
    #[arg(long, conflicts_with = "binary")]
    pub version: Option<String>,
    /// Swap in this pre-built binary.
    #[arg(long)]
    pub binary: Option<PathBuf>,
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub health_timeout: Duration,
}

#[derive(Debug, Subcommand)]
pub enum NodeCommand {
    /// Start one node.
    Start { index: usize },
    /// Stop one node.
    Stop { index: usize },
    /// Tail one node's log.
    Logs {
        index: usize,
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub action: Option<ExportAction>,
    /// Label recorded with a fresh export.
    #[arg(long, default_value = "manual")]
    pub label: String,
}

#[derive(Debug, Subcommand)]
pub enum ExportAction {
    /// List captured exports, newest first.
    List,
    /// Show one export's metadata.
    Inspect { timestamp: u64 },
}

/// Parse, dispatch, report; returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    init_logging(&cli.global);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return 1;
        }
    };

    let json = cli.global.json;
    let result = runtime.block_on(execute(cli));
    match result {
        Ok(output) => {
            println!("{}", output.render(json));
            0
        }
        Err(err) => {
            // cancellation skips usage/help noise entirely
            eprintln!("{}", render_error(&err, json));
            err.exit_code()
        }
    }
}

async fn execute(cli: Cli) -> ForgeResult<CommandOutput> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!(target: "forge::cli", "interrupt received; cancelling");
            signal_cancel.cancel();
        }
    });

    let ctx = CommandContext::new(
        cli.global.home,
        cli.global.json,
        cli.global.family,
        cancel.clone(),
    )?;

    let result = match cli.command {
        Command::Deploy(args) => commands::deploy::run(&ctx, args).await,
        Command::Start(args) => commands::lifecycle::start(&ctx, args).await,
        Command::Stop => commands::lifecycle::stop(&ctx).await,
        Command::Restart(args) => commands::lifecycle::restart(&ctx, args).await,
        Command::Status => commands::status::run(&ctx).await,
        Command::Destroy(args) => commands::destroy::run(&ctx, args).await,
        Command::Reset(args) => commands::reset::run(&ctx, args).await,
        Command::Upgrade(args) => commands::upgrade::run(&ctx, args).await,
        Command::Replace(args) => commands::replace::run(&ctx, args).await,
        Command::Node(command) => commands::node::run(&ctx, command).await,
        Command::Export(args) => commands::export::run(&ctx, args).await,
        Command::ExportKeys => commands::export::keys(&ctx).await,
    };

    // a cancelled scope wins over whatever error it interrupted
    if cancel.is_cancelled() {
        if let Err(ref err) = result {
            if !matches!(err, ForgeError::Cancelled) {
                return Err(ForgeError::Cancelled);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn durations_parse_humantime() {
        let cli = Cli::try_parse_from([
            "chainforge", "upgrade", "--name", "v2-upgrade", "--version", "v2.0.0",
            "--voting-period", "90s",
        ])
        .unwrap();
        match cli.command {
            Command::Upgrade(args) => {
                assert_eq!(args.voting_period, Some(Duration::from_secs(90)));
                assert_eq!(args.height_buffer, 0);
            }
            other => panic!("parsed into {other:?}"),
        }
    }
}

fn init_logging(global: &GlobalArgs) {
    let default = match global.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chainforge={default},forge={default}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!global.no_color)
        .with_writer(std::io::stderr)
        .try_init();
}
