// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! The network plugin contract.
//!
//! A plugin teaches chainforge one blockchain family: which binary to run,
//! how to build its command lines, how to doctor a genesis document for
//! devnet use, and where its public snapshots live. Optional abilities are
//! declared up front in a [PluginCapabilities] set and checked before
//! dispatch; there is no call-time downcasting.

mod generic;
mod registry;

pub use generic::GenericCosmosPlugin;
pub use registry::PluginRegistry;

use async_trait::async_trait;
use cf_config::atomic_write;
use cf_rpc::{GovParams, GovQuery};
use cf_types::{ForgeResult, NetworkSource, NodePorts, NodeRecord};
use std::{path::Path, sync::Arc};

/// Optional abilities a plugin may declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginCapabilities {
    /// Answers governance parameter queries itself instead of the generic
    /// REST fallback.
    pub governance_params: bool,
    /// Modifies genesis documents in place on disk, so oversized blobs
    /// never cross a transport boundary as bytes.
    pub genesis_file_modify: bool,
    /// Provides a state exporter.
    pub state_export: bool,
}

/// Snapshot format and module requirements of a plugin's state exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterSpec {
    pub snapshot_format: String,
    pub required_modules: Vec<String>,
}

/// One blockchain family's integration surface.
#[async_trait]
pub trait NetworkPlugin: Send + Sync {
    /// Family name; unique across registered plugins.
    fn name(&self) -> &str;

    /// Name of the node binary (`demod`).
    fn binary_name(&self) -> &str;

    /// Default node home directory name, relative to a node dir.
    fn default_home(&self) -> &str;

    /// Base port set for node index 0.
    fn default_ports(&self) -> NodePorts;

    /// Container image reference for a version, applying the family's tag
    /// formatting rule.
    fn image(&self, network: NetworkSource, version: &str) -> String;

    /// Git repository the build collaborator compiles from.
    fn source_repo(&self) -> &str;

    /// Argv for `init` (after the binary itself).
    fn init_args(&self, chain_id: &str, moniker: &str, home: &Path) -> Vec<String>;

    /// Argv for `start`.
    fn start_args(&self, node: &NodeRecord, home: &Path) -> Vec<String>;

    /// Argv for a deterministic state export.
    fn export_args(&self, home: &Path) -> Vec<String>;

    /// Argv submitting an expedited software-upgrade proposal.
    fn submit_upgrade_args(
        &self,
        upgrade_name: &str,
        height: u64,
        deposit: &str,
        from_key: &str,
        chain_id: &str,
        home: &Path,
    ) -> Vec<String>;

    /// Argv casting a YES vote from a validator key.
    fn vote_args(&self, proposal_id: u64, from_key: &str, chain_id: &str, home: &Path)
        -> Vec<String>;

    /// Public snapshot URL for a source network, when the family publishes
    /// one.
    fn snapshot_url(&self, network: NetworkSource) -> Option<String>;

    /// The abilities this plugin declares.
    fn capabilities(&self) -> PluginCapabilities;

    /// Rewrite a genesis document for devnet use (bytes variant).
    fn modify_genesis(&self, genesis: &[u8]) -> ForgeResult<Vec<u8>>;

    /// File-path variant of [Self::modify_genesis] for large blobs.
    ///
    /// The default routes through the bytes variant with an atomic
    /// write-back; plugins declaring `genesis_file_modify` may override to
    /// stream.
    fn modify_genesis_file(&self, path: &Path) -> ForgeResult<()> {
        let bytes = std::fs::read(path)?;
        let modified = self.modify_genesis(&bytes)?;
        atomic_write(path, &modified)?;
        Ok(())
    }

    /// State exporter description; `None` unless `state_export` is
    /// declared.
    fn exporter(&self) -> Option<ExporterSpec> {
        None
    }

    /// Plugin-native governance parameter query; `None` declines.
    async fn governance_params(&self) -> ForgeResult<Option<GovParams>> {
        Ok(None)
    }
}

/// Adapter giving the RPC probe a capability-gated view of a plugin's
/// governance query.
pub struct PluginGovQuery {
    plugin: Arc<dyn NetworkPlugin>,
}

impl PluginGovQuery {
    pub fn new(plugin: Arc<dyn NetworkPlugin>) -> Self {
        Self { plugin }
    }
}

#[async_trait]
impl GovQuery for PluginGovQuery {
    async fn governance_params(&self) -> ForgeResult<Option<GovParams>> {
        if !self.plugin.capabilities().governance_params {
            return Ok(None);
        }
        self.plugin.governance_params().await
    }
}
