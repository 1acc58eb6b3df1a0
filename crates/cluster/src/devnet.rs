// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! The devnet: one cluster of N nodes under one home directory.

use crate::health::probe_cluster;
use cf_config::DevnetStore;
use cf_plugin::NetworkPlugin;
use cf_process::{ContainerExecutor, ContainerSpec, LocalExecutor, LocalHandle, StartSpec};
use cf_rpc::RpcProbe;
use cf_types::{
    aggregate, ClusterStatus, DevnetMetadata, ExecutionMode, ForgeError, ForgeResult,
    LifecycleState, NetworkSource, NodeHealth, NodePorts, NodeRecord,
};
use std::{fs, path::PathBuf, sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Node home mount point inside containers.
pub const CONTAINER_HOME: &str = "/forge-home";

/// Grace period for a node to exit after SIGTERM before escalation.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// Cadence of the post-start health wait.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What `deploy` asks for.
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    pub chain_id: String,
    pub network: NetworkSource,
    pub validators: usize,
    pub accounts: usize,
    pub mode: ExecutionMode,
    /// Container image reference, container mode only.
    pub image: Option<String>,
    /// External binary path, local mode with a custom binary.
    pub binary_path: Option<PathBuf>,
}

impl std::fmt::Debug for Devnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Devnet")
            .field("store", &self.store)
            .field("metadata", &self.metadata)
            .field("nodes", &self.nodes)
            .field("local", &self.local)
            .field("container", &self.container)
            .field("pending_mode", &self.pending_mode)
            .field("pending_image", &self.pending_image)
            .finish_non_exhaustive()
    }
}

/// One cluster: metadata, node records, and the executors that run them.
pub struct Devnet {
    store: DevnetStore,
    plugin: Arc<dyn NetworkPlugin>,
    metadata: DevnetMetadata,
    nodes: Vec<NodeRecord>,
    local: LocalExecutor,
    container: Option<ContainerExecutor>,
    /// Execution mode a mode-changing upgrade will move to. In-memory
    /// only: nodes restart in this mode during the switch, but the
    /// metadata records it only when the upgrade succeeds.
    pending_mode: Option<ExecutionMode>,
    /// Image a container upgrade will run, staged the same way.
    pending_image: Option<String>,
}

impl Devnet {
    /// Provision a new devnet: directories, port assignments and records,
    /// nothing started.
    pub fn provision(
        store: DevnetStore,
        plugin: Arc<dyn NetworkPlugin>,
        spec: ProvisionSpec,
    ) -> ForgeResult<Self> {
        if store.load_metadata_raw()?.is_some() {
            return Err(ForgeError::precondition_with_hint(
                "a devnet already exists under this home directory",
                "destroy it first or use a different --home",
            ));
        }
        if spec.validators == 0 {
            return Err(ForgeError::precondition("a devnet needs at least one validator"));
        }

        let mut metadata = DevnetMetadata::new(
            spec.chain_id.clone(),
            plugin.name(),
            spec.network,
            spec.validators,
            spec.accounts,
            spec.mode,
        );
        metadata.image = spec.image;
        metadata.binary_path = spec.binary_path;

        let base = plugin.default_ports();
        let mut nodes = Vec::with_capacity(spec.validators);
        for index in 0..spec.validators {
            let home = store.dirs().node_dir(index);
            fs::create_dir_all(&home)?;
            let record =
                NodeRecord::new(index, &spec.chain_id, home, NodePorts::for_index(&base, index));
            store.save_node(&record)?;
            nodes.push(record);
        }

        metadata.transition(LifecycleState::Provisioned)?;
        store.save_metadata(&metadata)?;
        info!(
            target: "forge::cluster",
            chain_id = %metadata.chain_id,
            validators = spec.validators,
            mode = %metadata.mode,
            "devnet provisioned"
        );

        Self::assemble(store, plugin, metadata, nodes)
    }

    /// Open the existing devnet under the store's home directory.
    pub fn open(store: DevnetStore, plugin: Arc<dyn NetworkPlugin>) -> ForgeResult<Self> {
        let (metadata, nodes) = store.load_required()?;
        if metadata.family != plugin.name() {
            return Err(ForgeError::precondition(format!(
                "devnet belongs to family {}, not {}",
                metadata.family,
                plugin.name()
            )));
        }
        Self::assemble(store, plugin, metadata, nodes)
    }

    fn assemble(
        store: DevnetStore,
        plugin: Arc<dyn NetworkPlugin>,
        metadata: DevnetMetadata,
        nodes: Vec<NodeRecord>,
    ) -> ForgeResult<Self> {
        let container = match metadata.mode {
            ExecutionMode::Container => Some(ContainerExecutor::connect()?),
            ExecutionMode::Local => None,
        };
        Ok(Self {
            store,
            plugin,
            metadata,
            nodes,
            local: LocalExecutor,
            container,
            pending_mode: None,
            pending_image: None,
        })
    }

    pub fn metadata(&self) -> &DevnetMetadata {
        &self.metadata
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn plugin(&self) -> &Arc<dyn NetworkPlugin> {
        &self.plugin
    }

    pub fn store(&self) -> &DevnetStore {
        &self.store
    }

    /// Record the version the devnet first runs with (idempotent).
    pub fn set_initial_version(&mut self, version: &str) -> ForgeResult<()> {
        self.metadata.set_initial_version(version)?;
        self.store.save_metadata(&self.metadata)
    }

    /// Advance the current version (successful upgrade or replace), commit
    /// any staged mode and image, and persist.
    pub fn advance_version(&mut self, version: &str, mode: Option<ExecutionMode>) -> ForgeResult<()> {
        self.metadata.advance_version(version);
        if let Some(image) = self.pending_image.take() {
            self.metadata.image = Some(image);
        }
        if let Some(mode) = mode.or(self.pending_mode.take()) {
            if mode != self.metadata.mode {
                warn!(target: "forge::cluster", %mode, "execution mode changed");
                self.metadata.mode = mode;
                if mode == ExecutionMode::Container && self.container.is_none() {
                    self.container = Some(ContainerExecutor::connect()?);
                }
            }
        }
        self.pending_mode = None;
        self.store.save_metadata(&self.metadata)
    }

    /// Set the container image the nodes run (persisted with the metadata).
    pub fn set_image(&mut self, image: String) -> ForgeResult<()> {
        self.metadata.image = Some(image);
        self.store.save_metadata(&self.metadata)
    }

    /// Stage an execution mode for the switching stage: node restarts use
    /// it immediately, the metadata only records it on success.
    pub fn stage_mode(&mut self, mode: ExecutionMode) -> ForgeResult<()> {
        if mode == ExecutionMode::Container && self.container.is_none() {
            self.container = Some(ContainerExecutor::connect()?);
        }
        self.pending_mode = Some(mode);
        Ok(())
    }

    /// Stage a container image the same way.
    pub fn stage_image(&mut self, image: String) {
        self.pending_image = Some(image);
    }

    /// The mode node starts use: a staged mode wins over the persisted one.
    pub fn effective_mode(&self) -> ExecutionMode {
        self.pending_mode.unwrap_or(self.metadata.mode)
    }

    fn effective_image(&self) -> Option<String> {
        self.pending_image.clone().or_else(|| self.metadata.image.clone())
    }

    /// The binary a local-mode node executes: the custom path when one was
    /// deployed, otherwise the active pointer.
    pub fn local_binary(&self) -> PathBuf {
        match &self.metadata.binary_path {
            Some(path) => path.clone(),
            None => self.store.dirs().active_binary(self.plugin.binary_name()),
        }
    }

    /// Initialize node homes with the chain binary (local mode).
    ///
    /// Runs the plugin's `init` for every node that has no config yet, then
    /// doctors each genesis for devnet governance windows.
    pub async fn init_nodes(&mut self) -> ForgeResult<()> {
        let binary = self.local_binary();
        for node in &mut self.nodes {
            let genesis = node.home.join("config/genesis.json");
            if genesis.exists() {
                debug!(target: "forge::cluster", index = node.index, "node already initialized");
                continue;
            }
            let args = self.plugin.init_args(&self.metadata.chain_id, &node.moniker, &node.home);
            let output = tokio::process::Command::new(&binary)
                .args(&args)
                .output()
                .await
                .map_err(|e| ForgeError::unavailable("node binary", e.to_string()))?;
            if !output.status.success() {
                return Err(ForgeError::unavailable(
                    "node init",
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ));
            }
            if genesis.exists() {
                self.plugin.modify_genesis_file(&genesis)?;
            }
            info!(target: "forge::cluster", index = node.index, "node initialized");
        }
        Ok(())
    }

    /// Start every node in index order, then wait for the cluster to
    /// report healthy within `health_timeout`.
    pub async fn start_all(
        &mut self,
        health_timeout: Duration,
        cancel: &CancellationToken,
    ) -> ForgeResult<()> {
        for index in 0..self.nodes.len() {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled);
            }
            self.start_node(index).await?;
        }
        self.metadata.transition(LifecycleState::Running)?;
        self.store.save_metadata(&self.metadata)?;
        self.await_healthy(health_timeout, cancel).await
    }

    /// Start node `index` with its recorded ports, home and moniker.
    pub async fn start_node(&mut self, index: usize) -> ForgeResult<()> {
        let node = self
            .nodes
            .get(index)
            .ok_or_else(|| ForgeError::precondition(format!("no node {index}")))?
            .clone();

        match self.effective_mode() {
            ExecutionMode::Local => {
                if let Some(pid) = node.pid {
                    if self.local.is_alive(LocalHandle { pid }) {
                        debug!(target: "forge::cluster", index, pid, "node already running");
                        return Ok(());
                    }
                }
                let spec = StartSpec {
                    program: self.local_binary(),
                    args: self.plugin.start_args(&node, &node.home),
                    env: Vec::new(),
                    workdir: node.home.clone(),
                    logfile: node.log_path(),
                    pidfile: node.pid_path(),
                };
                let handle = self.local.start(&spec)?;
                self.nodes[index].pid = Some(handle.pid);
            }
            ExecutionMode::Container => {
                let image = self.effective_image().ok_or_else(|| {
                    ForgeError::precondition("container mode devnet has no image recorded")
                })?;
                // inside the container every node uses the base ports; the
                // per-node host ports come from the bindings
                let mut inner = node.clone();
                inner.ports = self.plugin.default_ports();
                let container_home = PathBuf::from(CONTAINER_HOME);
                let mut cmd = vec![self.plugin.binary_name().to_string()];
                cmd.extend(self.plugin.start_args(&inner, &container_home));

                let spec = ContainerSpec {
                    name: container_name(&self.metadata.chain_id, index),
                    image,
                    cmd,
                    env: Vec::new(),
                    ports: node
                        .ports
                        .all()
                        .iter()
                        .zip(inner.ports.all())
                        .map(|(host, container)| (*host, container))
                        .collect(),
                    volumes: vec![(node.home.clone(), CONTAINER_HOME.to_string())],
                };
                self.executor()?.start(&spec).await?;
                self.nodes[index].container_name = Some(spec.name);
            }
        }
        self.store.save_node(&self.nodes[index])?;
        Ok(())
    }

    /// Stop node `index`; graceful with escalation, idempotent.
    pub async fn stop_node(&mut self, index: usize) -> ForgeResult<()> {
        let node = self
            .nodes
            .get(index)
            .ok_or_else(|| ForgeError::precondition(format!("no node {index}")))?
            .clone();

        match self.metadata.mode {
            ExecutionMode::Local => {
                if let Some(pid) = node.pid {
                    self.local.stop(LocalHandle { pid }, STOP_TIMEOUT).await?;
                    self.nodes[index].pid = None;
                    let _ = fs::remove_file(node.pid_path());
                }
            }
            ExecutionMode::Container => {
                let name = node
                    .container_name
                    .unwrap_or_else(|| container_name(&self.metadata.chain_id, index));
                self.executor()?.stop(&name, STOP_TIMEOUT).await?;
            }
        }
        self.store.save_node(&self.nodes[index])?;
        Ok(())
    }

    /// Stop all nodes, in index order.
    pub async fn stop_all(&mut self) -> ForgeResult<()> {
        for index in 0..self.nodes.len() {
            self.stop_node(index).await?;
        }
        self.metadata.transition(LifecycleState::Stopped)?;
        self.store.save_metadata(&self.metadata)
    }

    /// Tail a container's log (container mode only).
    pub async fn container_logs(&self, name: &str, lines: usize) -> ForgeResult<Vec<String>> {
        self.executor()?.logs_tail(name, lines).await
    }

    /// Probe every node and classify the cluster.
    pub async fn health(&self) -> ForgeResult<Vec<NodeHealth>> {
        let probe = RpcProbe::new()?;
        let running: Vec<bool> = match self.metadata.mode {
            ExecutionMode::Local => self
                .nodes
                .iter()
                .map(|n| n.pid.map(|pid| self.local.is_alive(LocalHandle { pid })).unwrap_or(false))
                .collect(),
            ExecutionMode::Container => {
                let mut running = Vec::with_capacity(self.nodes.len());
                for (index, node) in self.nodes.iter().enumerate() {
                    let name = node
                        .container_name
                        .clone()
                        .unwrap_or_else(|| container_name(&self.metadata.chain_id, index));
                    running.push(self.executor()?.is_running(&name).await);
                }
                running
            }
        };
        Ok(probe_cluster(&probe, &self.nodes, &running).await)
    }

    /// Block until the cluster aggregates to Running, or time out.
    async fn await_healthy(
        &self,
        health_timeout: Duration,
        cancel: &CancellationToken,
    ) -> ForgeResult<()> {
        let deadline = Instant::now() + health_timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled);
            }
            let health = self.health().await?;
            if aggregate(&health) == ClusterStatus::Running {
                info!(target: "forge::cluster", "all nodes healthy");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ForgeError::Timeout {
                    operation: "waiting for all nodes to report healthy".into(),
                    hint: Some("run `chainforge status` or `chainforge node logs <i>`".into()),
                });
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ForgeError::Cancelled),
                _ = sleep(HEALTH_POLL_INTERVAL) => {}
            }
        }
    }

    /// Soft reset: discard node data directories, keep configuration.
    pub async fn reset_soft(&mut self) -> ForgeResult<()> {
        self.stop_all().await?;
        for node in &self.nodes {
            let data = node.home.join("data");
            match fs::remove_dir_all(&data) {
                Ok(()) => debug!(target: "forge::cluster", index = node.index, "data dir removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(target: "forge::cluster", "soft reset complete; configuration preserved");
        Ok(())
    }

    /// Hard reset: remove the devnet root entirely.
    pub async fn reset_hard(mut self) -> ForgeResult<()> {
        self.stop_all().await?;
        self.remove_containers().await?;
        fs::remove_dir_all(self.store.dirs().devnet_dir())?;
        info!(target: "forge::cluster", "hard reset complete; devnet removed");
        Ok(())
    }

    /// Destroy the cluster: stop everything and remove the devnet root.
    /// Cache purging is the caller's decision.
    pub async fn destroy(self) -> ForgeResult<()> {
        self.reset_hard().await
    }

    async fn remove_containers(&self) -> ForgeResult<()> {
        if self.metadata.mode == ExecutionMode::Container {
            let executor = self.executor()?;
            for (index, node) in self.nodes.iter().enumerate() {
                let name = node
                    .container_name
                    .clone()
                    .unwrap_or_else(|| container_name(&self.metadata.chain_id, index));
                executor.remove(&name).await?;
            }
        }
        Ok(())
    }

    pub(crate) fn executor(&self) -> ForgeResult<&ContainerExecutor> {
        self.container.as_ref().ok_or_else(|| {
            ForgeError::precondition("devnet is not in container mode")
        })
    }

    pub(crate) fn local_executor(&self) -> &LocalExecutor {
        &self.local
    }
}

fn container_name(chain_id: &str, index: usize) -> String {
    format!("{chain_id}-node{index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_config::ForgeDirs;
    use cf_plugin::GenericCosmosPlugin;
    use cf_types::ports_disjoint;

    fn spec(validators: usize) -> ProvisionSpec {
        ProvisionSpec {
            chain_id: "forge-1".into(),
            network: NetworkSource::Testnet,
            validators,
            accounts: 2,
            mode: ExecutionMode::Local,
            image: None,
            binary_path: None,
        }
    }

    fn provision(validators: usize) -> (tempfile::TempDir, Devnet) {
        let tmp = tempfile::tempdir().unwrap();
        let store = DevnetStore::new(ForgeDirs::new(tmp.path()));
        let devnet =
            Devnet::provision(store, Arc::new(GenericCosmosPlugin::demo()), spec(validators))
                .unwrap();
        (tmp, devnet)
    }

    #[test]
    fn provision_assigns_disjoint_ports_and_persists() {
        let (tmp, devnet) = provision(4);
        assert!(ports_disjoint(devnet.nodes()));
        assert_eq!(devnet.metadata().lifecycle, LifecycleState::Provisioned);

        // a fresh open sees the same state
        let store = DevnetStore::new(ForgeDirs::new(tmp.path()));
        let reopened = Devnet::open(store, Arc::new(GenericCosmosPlugin::demo())).unwrap();
        assert_eq!(reopened.nodes(), devnet.nodes());
        assert_eq!(reopened.metadata(), devnet.metadata());
    }

    #[test]
    fn provision_refuses_a_second_devnet() {
        let (tmp, _devnet) = provision(1);
        let store = DevnetStore::new(ForgeDirs::new(tmp.path()));
        let err = Devnet::provision(store, Arc::new(GenericCosmosPlugin::demo()), spec(1))
            .unwrap_err();
        assert!(matches!(err, ForgeError::PreconditionFailed { .. }));
    }

    #[test]
    fn a_hundred_validators_get_distinct_ports() {
        let (_tmp, devnet) = provision(100);
        assert!(ports_disjoint(devnet.nodes()));
    }

    #[tokio::test]
    async fn stop_of_a_stopped_node_is_a_no_op() {
        let (_tmp, mut devnet) = provision(2);
        devnet.stop_node(0).await.unwrap();
        assert!(devnet.nodes()[0].pid.is_none());
    }

    #[tokio::test]
    async fn local_nodes_start_and_stop_as_real_processes() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let binary = tmp.path().join("demod");
        fs::write(&binary, "#!/bin/sh\nsleep 30\n").unwrap();
        let mut perms = fs::metadata(&binary).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&binary, perms).unwrap();

        let store = DevnetStore::new(ForgeDirs::new(tmp.path()));
        let mut provision_spec = spec(1);
        provision_spec.binary_path = Some(binary);
        let mut devnet =
            Devnet::provision(store, Arc::new(GenericCosmosPlugin::demo()), provision_spec)
                .unwrap();

        devnet.start_node(0).await.unwrap();
        let pid = devnet.nodes()[0].pid.expect("pid recorded");
        let recorded: u32 = fs::read_to_string(devnet.nodes()[0].pid_path())
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(recorded, pid);

        // the record with the pid is persisted, not just in memory
        let reopened = DevnetStore::new(ForgeDirs::new(tmp.path())).load_nodes(1).unwrap();
        assert_eq!(reopened[0].pid, Some(pid));

        devnet.stop_node(0).await.unwrap();
        assert!(devnet.nodes()[0].pid.is_none());
        assert!(!devnet.nodes()[0].pid_path().exists());
    }

    #[test]
    fn local_binary_prefers_the_custom_path() {
        let (tmp, mut devnet) = provision(1);
        assert!(devnet.local_binary().ends_with("bin/demod"));
        devnet.metadata.binary_path = Some(tmp.path().join("custom/demod"));
        assert_eq!(devnet.local_binary(), tmp.path().join("custom/demod"));
    }
}
