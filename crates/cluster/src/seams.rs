// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Production implementations of the upgrade orchestrator's seams.
//!
//! [ClusterProbe] reads the chain over the nodes' RPC endpoints,
//! [CliGovGateway] writes governance transactions through the node
//! binary's own tx subcommands, and [ClusterSwitcher] drives node
//! stop/install/start against the shared [Devnet].

use crate::Devnet;
use async_trait::async_trait;
use cf_cache::BinaryCache;
use cf_config::atomic_write;
use cf_plugin::{NetworkPlugin, PluginGovQuery};
use cf_process::{tail_log, ContainerExecutor};
use cf_rpc::{GovParams, GovQuery, NodeProbe, ProposalStatus, RpcProbe};
use cf_types::{ExecutionMode, ForgeError, ForgeResult, NodeRecord};
use cf_upgrade::{ChainReader, GovGateway, NodeSwitcher, VoteOutcome};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{process::Command, sync::RwLock, time::sleep};
use tracing::{debug, info, warn};

const LOCALHOST: &str = "127.0.0.1";
/// How long the gateway waits to observe a freshly submitted proposal.
const SUBMIT_OBSERVE_ATTEMPTS: usize = 30;
const SUBMIT_OBSERVE_INTERVAL: Duration = Duration::from_millis(500);
/// Lines of log context attached to a failed restart.
const FAILURE_LOG_LINES: usize = 20;

/// [ChainReader] over the cluster's RPC endpoints.
pub struct ClusterProbe {
    probe: RpcProbe,
    nodes: Vec<NodeRecord>,
    gov: PluginGovQuery,
}

impl ClusterProbe {
    pub fn new(plugin: Arc<dyn NetworkPlugin>, nodes: Vec<NodeRecord>) -> ForgeResult<Self> {
        Ok(Self { probe: RpcProbe::new()?, nodes, gov: PluginGovQuery::new(plugin) })
    }

    fn api_port(&self) -> u16 {
        self.nodes[0].ports.api
    }
}

#[async_trait]
impl ChainReader for ClusterProbe {
    async fn node_height(&self, index: usize) -> ForgeResult<Option<NodeProbe>> {
        let node = self
            .nodes
            .get(index)
            .ok_or_else(|| ForgeError::precondition(format!("no node {index}")))?;
        self.probe.height(LOCALHOST, node.ports.rpc).await
    }

    async fn governance_params(&self) -> ForgeResult<GovParams> {
        self.probe
            .governance_params(Some(&self.gov as &dyn GovQuery), LOCALHOST, self.api_port())
            .await
    }

    async fn proposal_status(&self, id: u64) -> ForgeResult<ProposalStatus> {
        self.probe.proposal_status(LOCALHOST, self.api_port(), id).await
    }
}

/// How governance transactions reach the chain: the local node binary, or
/// a one-shot container sharing the node's home volume.
pub enum TxRunner {
    Local { binary: PathBuf },
    Container { executor: ContainerExecutor, image: String, binary_name: String },
}

/// [GovGateway] shelling out to the node binary's tx subcommands.
///
/// Validator keys follow the provisioning convention `validator<i>` in the
/// node's test keyring.
pub struct CliGovGateway {
    runner: TxRunner,
    plugin: Arc<dyn NetworkPlugin>,
    chain_id: String,
    /// Host-side node home directories, by index.
    node_homes: Vec<PathBuf>,
    /// Minimum expedited deposit, `<amount><denom>`.
    deposit: String,
    probe: RpcProbe,
    api_port: u16,
}

impl CliGovGateway {
    pub fn new(
        runner: TxRunner,
        plugin: Arc<dyn NetworkPlugin>,
        chain_id: String,
        node_homes: Vec<PathBuf>,
        deposit: String,
        api_port: u16,
    ) -> ForgeResult<Self> {
        Ok(Self { runner, plugin, chain_id, node_homes, deposit, probe: RpcProbe::new()?, api_port })
    }

    /// Run one tx subcommand for node `index` and parse its JSON broadcast
    /// result. `build_args` receives the home path as the runner sees it.
    async fn run_tx<F>(&self, index: usize, build_args: F) -> ForgeResult<TxResult>
    where
        F: Fn(&Path) -> Vec<String>,
    {
        match &self.runner {
            TxRunner::Local { binary } => {
                let args = build_args(&self.node_homes[index]);
                let output = Command::new(binary)
                    .args(&args)
                    .output()
                    .await
                    .map_err(|e| ForgeError::unavailable("node binary", e.to_string()))?;
                if !output.status.success() {
                    return Err(ForgeError::rejected(
                        "tx broadcast",
                        String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    ));
                }
                parse_tx_result(&output.stdout)
            }
            TxRunner::Container { executor, image, binary_name } => {
                let mut cmd = vec![binary_name.clone()];
                cmd.extend(build_args(Path::new(crate::CONTAINER_HOME)));
                let lines = executor
                    .run_once(
                        &format!("{}-tx-{index}", self.chain_id),
                        image,
                        cmd,
                        vec![(self.node_homes[index].clone(), crate::CONTAINER_HOME.to_string())],
                    )
                    .await
                    .map_err(|e| ForgeError::rejected("tx broadcast", e.to_string()))?;
                parse_tx_result(lines.join("\n").as_bytes())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TxResult {
    code: u64,
    raw_log: String,
}

fn parse_tx_result(stdout: &[u8]) -> ForgeResult<TxResult> {
    let value: serde_json::Value = serde_json::from_slice(stdout).map_err(|e| {
        ForgeError::unavailable("node binary", format!("malformed tx output: {e}"))
    })?;
    Ok(TxResult {
        code: value.get("code").and_then(|v| v.as_u64()).unwrap_or(0),
        raw_log: value
            .get("raw_log")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

#[async_trait]
impl GovGateway for CliGovGateway {
    async fn submit_upgrade(&self, upgrade_name: &str, height: u64) -> ForgeResult<u64> {
        let before = self
            .probe
            .latest_proposal_id(LOCALHOST, self.api_port)
            .await?
            .unwrap_or(0);

        let result = self
            .run_tx(0, |home| {
                self.plugin.submit_upgrade_args(
                    upgrade_name,
                    height,
                    &self.deposit,
                    "validator0",
                    &self.chain_id,
                    home,
                )
            })
            .await?;
        if result.code != 0 {
            return Err(ForgeError::rejected("proposal", result.raw_log));
        }

        // completion means the tx landed in a block and the proposal is
        // queryable, not merely that the broadcast was accepted
        for _ in 0..SUBMIT_OBSERVE_ATTEMPTS {
            if let Some(id) = self.probe.latest_proposal_id(LOCALHOST, self.api_port).await? {
                if id > before {
                    info!(target: "forge::cluster", proposal_id = id, "proposal observed on chain");
                    return Ok(id);
                }
            }
            sleep(SUBMIT_OBSERVE_INTERVAL).await;
        }
        Err(ForgeError::Timeout {
            operation: "observing the submitted proposal".into(),
            hint: Some("the proposal was submitted but not yet observed; poll the chain".into()),
        })
    }

    async fn vote(&self, index: usize, proposal_id: u64) -> ForgeResult<VoteOutcome> {
        let from_key = format!("validator{index}");
        let result = match self
            .run_tx(index, |home| {
                self.plugin.vote_args(proposal_id, &from_key, &self.chain_id, home)
            })
            .await
        {
            Ok(result) => result,
            Err(ForgeError::ChainRejected { message, .. })
                if message.contains("already voted") =>
            {
                return Ok(VoteOutcome::AlreadyVoted);
            }
            Err(e) => return Err(e),
        };
        if result.code == 0 {
            Ok(VoteOutcome::Cast)
        } else if result.raw_log.contains("already voted") {
            debug!(target: "forge::cluster", index, proposal_id, "validator had already voted");
            Ok(VoteOutcome::AlreadyVoted)
        } else {
            Err(ForgeError::rejected("vote", result.raw_log))
        }
    }
}

/// What the switching stage installs.
#[derive(Debug, Clone)]
pub enum SwitchTarget {
    /// Pull this image and restart every node on it.
    Image(String),
    /// Repoint the active pointer at this cached binary.
    CacheActivate { path: PathBuf },
    /// Copy this external binary over the expected location.
    CopyBinary { from: PathBuf },
}

/// [NodeSwitcher] over the shared [Devnet].
pub struct ClusterSwitcher {
    devnet: Arc<RwLock<Devnet>>,
    cache: BinaryCache,
    target: SwitchTarget,
    node_count: usize,
    binary_name: String,
    /// Executor used for image pulls when the devnet itself is still in
    /// local mode (mode-changing upgrade).
    puller: Option<ContainerExecutor>,
}

impl ClusterSwitcher {
    pub fn new(
        devnet: Arc<RwLock<Devnet>>,
        cache: BinaryCache,
        target: SwitchTarget,
        node_count: usize,
        binary_name: String,
    ) -> ForgeResult<Self> {
        let puller = match &target {
            SwitchTarget::Image(_) => Some(ContainerExecutor::connect()?),
            _ => None,
        };
        Ok(Self { devnet, cache, target, node_count, binary_name, puller })
    }

    pub fn devnet(&self) -> Arc<RwLock<Devnet>> {
        self.devnet.clone()
    }
}

#[async_trait]
impl NodeSwitcher for ClusterSwitcher {
    fn node_count(&self) -> usize {
        self.node_count
    }

    async fn stop_node(&self, index: usize) -> ForgeResult<()> {
        self.devnet.write().await.stop_node(index).await
    }

    async fn install_target(&self) -> ForgeResult<()> {
        match &self.target {
            SwitchTarget::Image(image) => {
                self.puller
                    .as_ref()
                    .expect("puller exists for image targets")
                    .pull(image)
                    .await?;
                let mut devnet = self.devnet.write().await;
                devnet.stage_image(image.clone());
                devnet.stage_mode(ExecutionMode::Container)?;
            }
            SwitchTarget::CacheActivate { path } => {
                // one global repoint; every node follows the pointer
                self.cache.activate(&self.binary_name, path)?;
                self.devnet.write().await.stage_mode(ExecutionMode::Local)?;
            }
            SwitchTarget::CopyBinary { from } => {
                let devnet = self.devnet.read().await;
                let dest = devnet.local_binary();
                drop(devnet);
                atomic_copy(from, &dest)?;
                self.devnet.write().await.stage_mode(ExecutionMode::Local)?;
            }
        }
        info!(target: "forge::cluster", target = ?self.target, "upgrade target installed");
        Ok(())
    }

    async fn start_node(&self, index: usize) -> ForgeResult<()> {
        self.devnet.write().await.start_node(index).await
    }

    async fn log_tail(&self, index: usize) -> Vec<String> {
        let devnet = self.devnet.read().await;
        let node = &devnet.nodes()[index];
        match devnet.effective_mode() {
            ExecutionMode::Local => tail_log(&node.log_path(), FAILURE_LOG_LINES).unwrap_or_default(),
            ExecutionMode::Container => match (devnet.executor(), &node.container_name) {
                (Ok(executor), Some(name)) => {
                    executor.logs_tail(name, FAILURE_LOG_LINES).await.unwrap_or_default()
                }
                _ => Vec::new(),
            },
        }
    }

    async fn export_genesis(&self, label: &str) -> ForgeResult<PathBuf> {
        self.devnet.write().await.export_genesis(label).await
    }

    async fn finalize(&self, version: &str, mode: Option<ExecutionMode>) -> ForgeResult<()> {
        self.devnet.write().await.advance_version(version, mode)
    }
}

/// Copy `from` over `dest` atomically: write beside the destination, then
/// rename into place.
fn atomic_copy(from: &Path, dest: &Path) -> ForgeResult<()> {
    let bytes = fs::read(from).map_err(|e| {
        ForgeError::precondition(format!("cannot read binary {}: {e}", from.display()))
    })?;
    atomic_write(dest, &bytes)?;
    // the write-then-rename loses the execute bit
    let mut perms = fs::metadata(dest)?.permissions();
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o755);
    fs::set_permissions(dest, perms)?;
    warn!(target: "forge::cluster", from = %from.display(), dest = %dest.display(), "binary replaced in place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_results_parse_code_and_log() {
        let ok = parse_tx_result(br#"{"height": "12", "txhash": "AB", "code": 0, "raw_log": ""}"#)
            .unwrap();
        assert_eq!(ok.code, 0);

        let rejected = parse_tx_result(
            br#"{"code": 19, "raw_log": "validator has already voted on this proposal"}"#,
        )
        .unwrap();
        assert_eq!(rejected.code, 19);
        assert!(rejected.raw_log.contains("already voted"));

        assert!(parse_tx_result(b"gas estimate: 200000").is_err());
    }

    #[test]
    fn atomic_copy_preserves_executability() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("new-binary");
        let dest = tmp.path().join("bin/demod");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&from, b"#!/bin/sh\necho v2\n").unwrap();
        fs::write(&dest, b"#!/bin/sh\necho v1\n").unwrap();

        atomic_copy(&from, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"#!/bin/sh\necho v2\n");
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o111, 0o111);
    }
}
