// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Generic Cosmos-SDK family plugin.
//!
//! Covers the common shape of SDK chains: `<binary> init/start/export`,
//! `tx gov submit-legacy-proposal software-upgrade` and `tx gov vote`,
//! CometBFT port conventions, and a genesis doctor that shrinks governance
//! windows to devnet scale.

use crate::{ExporterSpec, NetworkPlugin, PluginCapabilities};
use async_trait::async_trait;
use cf_types::{ForgeError, ForgeResult, NetworkSource, NodePorts, NodeRecord};
use serde::Deserialize;
use std::path::Path;

/// Expedited voting window written into doctored genesis documents.
const DEVNET_EXPEDITED_VOTING_PERIOD: &str = "30s";
/// Regular voting window written into doctored genesis documents.
const DEVNET_VOTING_PERIOD: &str = "60s";

/// A configurable plugin for Cosmos-SDK-shaped chains.
#[derive(Debug, Clone)]
pub struct GenericCosmosPlugin {
    family: String,
    binary: String,
    denom: String,
    image_repo: String,
    source_repo: String,
    snapshot_base: Option<String>,
}

impl GenericCosmosPlugin {
    pub fn new(
        family: impl Into<String>,
        binary: impl Into<String>,
        denom: impl Into<String>,
        image_repo: impl Into<String>,
        source_repo: impl Into<String>,
    ) -> Self {
        Self {
            family: family.into(),
            binary: binary.into(),
            denom: denom.into(),
            image_repo: image_repo.into(),
            source_repo: source_repo.into(),
            snapshot_base: None,
        }
    }

    /// Where public snapshots are published, per source network.
    pub fn with_snapshot_base(mut self, base: impl Into<String>) -> Self {
        self.snapshot_base = Some(base.into());
        self
    }

    /// The demo family used by fixtures and default registrations.
    pub fn demo() -> Self {
        Self::new(
            "demo",
            "demod",
            "stake",
            "ghcr.io/telcoin/demod",
            "https://github.com/telcoin/demod",
        )
    }

    /// Load a family descriptor from a YAML file.
    ///
    /// Lets operators add a chain family without recompiling; the file
    /// carries the same fields [Self::new] takes.
    pub fn from_descriptor(path: &Path) -> ForgeResult<Self> {
        #[derive(Deserialize)]
        struct Descriptor {
            family: String,
            binary: String,
            denom: String,
            image_repo: String,
            source_repo: String,
            #[serde(default)]
            snapshot_base: Option<String>,
        }

        let bytes = std::fs::read(path)?;
        let descriptor: Descriptor = serde_yaml::from_slice(&bytes)
            .map_err(|e| ForgeError::corruption(path, format!("descriptor: {e}")))?;
        let mut plugin = Self::new(
            descriptor.family,
            descriptor.binary,
            descriptor.denom,
            descriptor.image_repo,
            descriptor.source_repo,
        );
        plugin.snapshot_base = descriptor.snapshot_base;
        Ok(plugin)
    }
}

#[async_trait]
impl NetworkPlugin for GenericCosmosPlugin {
    fn name(&self) -> &str {
        &self.family
    }

    fn binary_name(&self) -> &str {
        &self.binary
    }

    fn default_home(&self) -> &str {
        "home"
    }

    fn default_ports(&self) -> NodePorts {
        NodePorts { rpc: 26657, p2p: 26656, grpc: 9090, api: 1317, evm_rpc: 8545, evm_ws: 8546 }
    }

    fn image(&self, _network: NetworkSource, version: &str) -> String {
        // tag rule: the version string verbatim
        format!("{}:{version}", self.image_repo)
    }

    fn source_repo(&self) -> &str {
        &self.source_repo
    }

    fn init_args(&self, chain_id: &str, moniker: &str, home: &Path) -> Vec<String> {
        vec![
            "init".into(),
            moniker.into(),
            "--chain-id".into(),
            chain_id.into(),
            "--home".into(),
            home.display().to_string(),
        ]
    }

    fn start_args(&self, node: &NodeRecord, home: &Path) -> Vec<String> {
        vec![
            "start".into(),
            "--home".into(),
            home.display().to_string(),
            "--moniker".into(),
            node.moniker.clone(),
            "--rpc.laddr".into(),
            format!("tcp://0.0.0.0:{}", node.ports.rpc),
            "--p2p.laddr".into(),
            format!("tcp://0.0.0.0:{}", node.ports.p2p),
            "--grpc.address".into(),
            format!("0.0.0.0:{}", node.ports.grpc),
            "--api.address".into(),
            format!("tcp://0.0.0.0:{}", node.ports.api),
            "--json-rpc.address".into(),
            format!("0.0.0.0:{}", node.ports.evm_rpc),
            "--json-rpc.ws-address".into(),
            format!("0.0.0.0:{}", node.ports.evm_ws),
        ]
    }

    fn export_args(&self, home: &Path) -> Vec<String> {
        vec!["export".into(), "--home".into(), home.display().to_string()]
    }

    fn submit_upgrade_args(
        &self,
        upgrade_name: &str,
        height: u64,
        deposit: &str,
        from_key: &str,
        chain_id: &str,
        home: &Path,
    ) -> Vec<String> {
        vec![
            "tx".into(),
            "gov".into(),
            "submit-legacy-proposal".into(),
            "software-upgrade".into(),
            upgrade_name.into(),
            "--title".into(),
            upgrade_name.into(),
            "--description".into(),
            format!("upgrade to {upgrade_name}"),
            "--upgrade-height".into(),
            height.to_string(),
            "--deposit".into(),
            deposit.into(),
            "--expedited".into(),
            "--no-validate".into(),
            "--from".into(),
            from_key.into(),
            "--chain-id".into(),
            chain_id.into(),
            "--home".into(),
            home.display().to_string(),
            "--keyring-backend".into(),
            "test".into(),
            "--yes".into(),
            "--output".into(),
            "json".into(),
        ]
    }

    fn vote_args(
        &self,
        proposal_id: u64,
        from_key: &str,
        chain_id: &str,
        home: &Path,
    ) -> Vec<String> {
        vec![
            "tx".into(),
            "gov".into(),
            "vote".into(),
            proposal_id.to_string(),
            "yes".into(),
            "--from".into(),
            from_key.into(),
            "--chain-id".into(),
            chain_id.into(),
            "--home".into(),
            home.display().to_string(),
            "--keyring-backend".into(),
            "test".into(),
            "--yes".into(),
            "--output".into(),
            "json".into(),
        ]
    }

    fn snapshot_url(&self, network: NetworkSource) -> Option<String> {
        self.snapshot_base.as_ref().map(|base| format!("{base}/{network}/latest.tar.lz4"))
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            governance_params: false,
            genesis_file_modify: true,
            state_export: true,
        }
    }

    /// Shrink governance windows so devnet proposals resolve in seconds.
    fn modify_genesis(&self, genesis: &[u8]) -> ForgeResult<Vec<u8>> {
        let mut doc: serde_json::Value = serde_json::from_slice(genesis)
            .map_err(|e| ForgeError::corruption("genesis.json", format!("parse: {e}")))?;

        if let Some(params) = doc.pointer_mut("/app_state/gov/params") {
            params["voting_period"] = DEVNET_VOTING_PERIOD.into();
            params["expedited_voting_period"] = DEVNET_EXPEDITED_VOTING_PERIOD.into();
            params["min_deposit"] = serde_json::json!([
                { "denom": self.denom, "amount": "1" }
            ]);
            params["expedited_min_deposit"] = serde_json::json!([
                { "denom": self.denom, "amount": "1" }
            ]);
        }

        serde_json::to_vec_pretty(&doc)
            .map_err(|e| ForgeError::corruption("genesis.json", format!("serialize: {e}")))
    }

    fn exporter(&self) -> Option<ExporterSpec> {
        Some(ExporterSpec {
            snapshot_format: "tar.lz4".into(),
            required_modules: vec!["bank".into(), "staking".into(), "gov".into(), "upgrade".into()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PluginGovQuery;
    use cf_rpc::GovQuery;
    use std::sync::Arc;

    #[test]
    fn image_applies_the_tag_rule() {
        let plugin = GenericCosmosPlugin::demo();
        assert_eq!(
            plugin.image(NetworkSource::Mainnet, "v1.2.3"),
            "ghcr.io/telcoin/demod:v1.2.3"
        );
    }

    #[test]
    fn genesis_doctor_shrinks_voting_windows() {
        let plugin = GenericCosmosPlugin::demo();
        let genesis = serde_json::json!({
            "app_state": {
                "gov": {
                    "params": {
                        "voting_period": "172800s",
                        "expedited_voting_period": "86400s",
                        "min_deposit": [{ "denom": "stake", "amount": "10000000" }]
                    }
                }
            }
        });
        let out = plugin.modify_genesis(serde_json::to_vec(&genesis).unwrap().as_slice()).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc.pointer("/app_state/gov/params/voting_period").unwrap(), "60s");
        assert_eq!(
            doc.pointer("/app_state/gov/params/expedited_voting_period").unwrap(),
            "30s"
        );
        assert_eq!(
            doc.pointer("/app_state/gov/params/min_deposit/0/amount").unwrap(),
            "1"
        );
    }

    #[test]
    fn genesis_file_variant_rewrites_in_place() {
        let plugin = GenericCosmosPlugin::demo();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("genesis.json");
        std::fs::write(
            &path,
            serde_json::to_vec(&serde_json::json!({
                "app_state": { "gov": { "params": { "voting_period": "172800s" } } }
            }))
            .unwrap(),
        )
        .unwrap();

        plugin.modify_genesis_file(&path).unwrap();
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc.pointer("/app_state/gov/params/voting_period").unwrap(), "60s");
    }

    #[test]
    fn descriptor_files_load_custom_families() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("evmnet.yaml");
        std::fs::write(
            &path,
            "family: evmnet\nbinary: evmnetd\ndenom: aevm\nimage_repo: ghcr.io/telcoin/evmnetd\nsource_repo: https://github.com/telcoin/evmnetd\nsnapshot_base: https://snapshots.example.org\n",
        )
        .unwrap();

        let plugin = GenericCosmosPlugin::from_descriptor(&path).unwrap();
        assert_eq!(plugin.name(), "evmnet");
        assert_eq!(plugin.binary_name(), "evmnetd");
        assert_eq!(
            plugin.snapshot_url(NetworkSource::Mainnet).unwrap(),
            "https://snapshots.example.org/mainnet/latest.tar.lz4"
        );
    }

    #[tokio::test]
    async fn gov_query_declines_without_the_capability() {
        let query = PluginGovQuery::new(Arc::new(GenericCosmosPlugin::demo()));
        assert!(query.governance_params().await.unwrap().is_none());
    }

    #[test]
    fn submit_args_request_an_expedited_proposal() {
        let plugin = GenericCosmosPlugin::demo();
        let args = plugin.submit_upgrade_args(
            "v2.0.0-upgrade",
            1500,
            "1stake",
            "validator0",
            "forge-1",
            Path::new("/tmp/node0/home"),
        );
        assert!(args.contains(&"--expedited".to_string()));
        assert!(args.contains(&"1500".to_string()));
        assert!(args.contains(&"software-upgrade".to_string()));
    }
}
