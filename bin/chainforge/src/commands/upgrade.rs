// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! `upgrade`: run the governance upgrade orchestrator.

use crate::{
    cli::UpgradeArgs,
    commands::deploy::spawn_build_renderer,
    context::CommandContext,
    output::{render_upgrade_event, CommandOutput},
};
use cf_build::{BuildCoordinator, BuildRequest, GitMakeBuilder};
use cf_cluster::{CliGovGateway, ClusterProbe, ClusterSwitcher, Devnet, SwitchTarget, TxRunner};
use cf_process::ContainerExecutor;
use cf_types::{
    ExecutionMode, ForgeError, ForgeResult, HeightBuffer, LifecycleState, UpgradePlan,
    UpgradeTarget,
};
use cf_upgrade::{ChainReader, UpgradeConfig, UpgradeOrchestrator};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Deposit used when the chain's governance parameters are unreadable.
const FALLBACK_DEPOSIT: &str = "10000000stake";

pub async fn run(ctx: &CommandContext, args: UpgradeArgs) -> ForgeResult<CommandOutput> {
    let plugin = ctx.plugin()?;
    let devnet = Devnet::open(ctx.store(), plugin.clone())?;

    if devnet.metadata().lifecycle != LifecycleState::Running {
        return Err(ForgeError::precondition_with_hint(
            "devnet must be running for a governance upgrade",
            "run `chainforge start` first",
        ));
    }
    if args.name.trim().is_empty() {
        return Err(ForgeError::precondition("the upgrade handler name must not be empty"));
    }

    let metadata = devnet.metadata().clone();
    let nodes = devnet.nodes().to_vec();

    // resolve what the switching stage installs
    let (switch_target, plan_target, mode) = match (&args.image, &args.binary, metadata.mode) {
        (Some(image), _, current) => (
            SwitchTarget::Image(image.clone()),
            UpgradeTarget::Image(image.clone()),
            (current != ExecutionMode::Container).then_some(ExecutionMode::Container),
        ),
        (None, Some(path), current) => (
            SwitchTarget::CopyBinary { from: path.clone() },
            UpgradeTarget::Path(path.clone()),
            (current != ExecutionMode::Local).then_some(ExecutionMode::Local),
        ),
        (None, None, ExecutionMode::Container) => {
            let image = plugin.image(metadata.network, &args.version);
            (SwitchTarget::Image(image.clone()), UpgradeTarget::Image(image), None)
        }
        (None, None, ExecutionMode::Local) => {
            // build now, activate later: the pointer must not move before
            // the switching stage
            let coordinator = BuildCoordinator::new(ctx.cache(), GitMakeBuilder::default());
            let (tx, rx) = mpsc::channel(64);
            let renderer = spawn_build_renderer(rx);
            let output = coordinator
                .obtain(
                    plugin.as_ref(),
                    &BuildRequest {
                        network: metadata.network,
                        reference: args.version.clone(),
                        to_cache: true,
                        activate: false,
                    },
                    &tx,
                )
                .await?;
            drop(tx);
            let _ = renderer.await;
            (
                SwitchTarget::CacheActivate { path: output.path },
                UpgradeTarget::CacheRef(output.cache_ref),
                None,
            )
        }
    };

    let plan = UpgradePlan {
        name: args.name,
        target: plan_target,
        version: args.version,
        mode,
        voting_period: args.voting_period,
        height_buffer: if args.height_buffer == 0 {
            HeightBuffer::Auto
        } else {
            HeightBuffer::Blocks(args.height_buffer)
        },
        export_genesis: args.export_genesis,
    };

    let probe = ClusterProbe::new(plugin.clone(), nodes.clone())?;
    let deposit = match probe.governance_params().await {
        Ok(params) => params
            .expedited_min_deposit
            .first()
            .map(|(amount, denom)| format!("{amount}{denom}"))
            .unwrap_or_else(|| FALLBACK_DEPOSIT.to_string()),
        Err(e) => {
            debug!(target: "forge::cli", %e, "gov params unavailable; using fallback deposit");
            FALLBACK_DEPOSIT.to_string()
        }
    };

    let runner = match metadata.mode {
        ExecutionMode::Local => TxRunner::Local { binary: devnet.local_binary() },
        ExecutionMode::Container => TxRunner::Container {
            executor: ContainerExecutor::connect()?,
            image: metadata.image.clone().ok_or_else(|| {
                ForgeError::precondition("container mode devnet has no image recorded")
            })?,
            binary_name: plugin.binary_name().to_string(),
        },
    };
    let gateway = CliGovGateway::new(
        runner,
        plugin.clone(),
        metadata.chain_id.clone(),
        nodes.iter().map(|n| n.home.clone()).collect(),
        deposit,
        nodes[0].ports.api,
    )?;

    let switcher = ClusterSwitcher::new(
        Arc::new(RwLock::new(devnet)),
        ctx.cache(),
        switch_target,
        nodes.len(),
        plugin.binary_name().to_string(),
    )?;

    // progress stream: rendered live in text mode, silent in JSON mode
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let json = ctx.json;
    let renderer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if !json {
                eprintln!("{}", render_upgrade_event(&event));
            }
        }
    });

    let orchestrator = UpgradeOrchestrator::new(
        probe,
        gateway,
        switcher,
        plan,
        UpgradeConfig::default(),
        ctx.cancel.clone(),
        events_tx,
    );
    let summary = orchestrator.run().await;
    let _ = renderer.await;

    Ok(CommandOutput::Upgrade { summary: summary? })
}
