// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Validator key export.
//!
//! Devnet keys are throwaway by construction, so dumping them is a
//! supported workflow (wiring wallets, debugging signing). The dump is one
//! JSON document covering every node's consensus and p2p keys.

use cf_types::{ForgeResult, NodeRecord};
use serde_json::json;
use std::fs;
use tracing::warn;

/// Collect validator and node key material from every node home.
///
/// Missing files (a node that was never initialized) dump as `null`
/// rather than failing the whole export.
pub fn export_keys(chain_id: &str, nodes: &[NodeRecord]) -> ForgeResult<serde_json::Value> {
    let mut entries = Vec::with_capacity(nodes.len());
    for node in nodes {
        let validator_key = read_key(node, "config/priv_validator_key.json");
        let node_key = read_key(node, "config/node_key.json");
        entries.push(json!({
            "index": node.index,
            "moniker": node.moniker,
            "validator_key": validator_key,
            "node_key": node_key,
        }));
    }
    Ok(json!({ "chain_id": chain_id, "nodes": entries }))
}

fn read_key(node: &NodeRecord, relative: &str) -> serde_json::Value {
    let path = node.home.join(relative);
    match fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        Err(_) => {
            warn!(
                target: "forge::cluster",
                index = node.index,
                path = %path.display(),
                "key file missing; exported as null"
            );
            serde_json::Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_types::NodePorts;

    #[test]
    fn keys_dump_covers_every_node_and_tolerates_gaps() {
        let tmp = tempfile::tempdir().unwrap();
        let ports =
            NodePorts { rpc: 26657, p2p: 26656, grpc: 9090, api: 1317, evm_rpc: 8545, evm_ws: 8546 };

        let node0 = NodeRecord::new(0, "forge-1", tmp.path().join("node0"), ports);
        let node1 = NodeRecord::new(1, "forge-1", tmp.path().join("node1"), ports);
        fs::create_dir_all(node0.home.join("config")).unwrap();
        fs::write(
            node0.home.join("config/priv_validator_key.json"),
            br#"{"address": "AA", "priv_key": {"type": "ed25519", "value": "secret"}}"#,
        )
        .unwrap();

        let dump = export_keys("forge-1", &[node0, node1]).unwrap();
        assert_eq!(dump["chain_id"], "forge-1");
        assert_eq!(dump["nodes"][0]["validator_key"]["address"], "AA");
        assert!(dump["nodes"][1]["validator_key"].is_null());
    }
}
