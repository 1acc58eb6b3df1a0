// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Per-node persisted state.

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf};

/// Offset between the port sets of consecutive node indices.
pub const PORT_STRIDE: u16 = 10;

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Validator,
    Full,
}

/// The six listener ports every node exposes.
///
/// All ports in a cluster are pairwise distinct and fixed at provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePorts {
    /// Consensus RPC (CometBFT-style).
    pub rpc: u16,
    /// Peer-to-peer listener.
    pub p2p: u16,
    /// gRPC query service.
    pub grpc: u16,
    /// Application REST API.
    pub api: u16,
    /// EVM JSON-RPC.
    pub evm_rpc: u16,
    /// EVM websocket.
    pub evm_ws: u16,
}

impl NodePorts {
    /// Shift a base port set for node `index`.
    pub fn for_index(base: &NodePorts, index: usize) -> Self {
        let shift = |p: u16| p + PORT_STRIDE * index as u16;
        Self {
            rpc: shift(base.rpc),
            p2p: shift(base.p2p),
            grpc: shift(base.grpc),
            api: shift(base.api),
            evm_rpc: shift(base.evm_rpc),
            evm_ws: shift(base.evm_ws),
        }
    }

    /// All six ports, for distinctness checks and reporting.
    pub fn all(&self) -> [u16; 6] {
        [self.rpc, self.p2p, self.grpc, self.api, self.evm_rpc, self.evm_ws]
    }
}

/// Persisted record for one node of a devnet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Position in the cluster, 0..N-1. Determines ordering everywhere.
    pub index: usize,
    /// Human-readable name baked into the node config.
    pub moniker: String,
    /// The node's home directory (config, data, log, pidfile).
    pub home: PathBuf,
    pub role: NodeRole,
    pub ports: NodePorts,
    /// OS pid of the running process. Absent means stopped (local mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Container name, when the devnet runs in container mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// P2P node id, filled in after `init`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl NodeRecord {
    pub fn new(index: usize, chain_id: &str, home: PathBuf, ports: NodePorts) -> Self {
        Self {
            index,
            moniker: format!("{chain_id}-node{index}"),
            home,
            role: NodeRole::Validator,
            ports,
            pid: None,
            container_name: None,
            node_id: None,
        }
    }

    /// Whether the record claims a locally started process.
    ///
    /// Pid presence is the source of truth in local mode; container liveness
    /// is queried from the runtime instead.
    pub fn is_started_locally(&self) -> bool {
        self.pid.is_some()
    }

    /// Path of the node's combined stdout/stderr log.
    pub fn log_path(&self) -> PathBuf {
        self.home.join("node.log")
    }

    /// Path of the node's pidfile (local mode only).
    pub fn pid_path(&self) -> PathBuf {
        self.home.join("node.pid")
    }
}

/// True when no port appears twice across the given records.
pub fn ports_disjoint(records: &[NodeRecord]) -> bool {
    let mut seen = HashSet::new();
    records.iter().flat_map(|r| r.ports.all()).all(|p| seen.insert(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NodePorts {
        NodePorts { rpc: 26657, p2p: 26656, grpc: 9090, api: 1317, evm_rpc: 8545, evm_ws: 8546 }
    }

    #[test]
    fn ports_are_pairwise_distinct_for_a_hundred_nodes() {
        let records: Vec<_> = (0..100)
            .map(|i| {
                NodeRecord::new(
                    i,
                    "forge-1",
                    PathBuf::from(format!("/tmp/node{i}")),
                    NodePorts::for_index(&base(), i),
                )
            })
            .collect();
        assert!(ports_disjoint(&records));
    }

    #[test]
    fn duplicate_ports_are_detected() {
        let a = NodeRecord::new(0, "forge-1", PathBuf::from("/tmp/a"), base());
        let b = NodeRecord::new(1, "forge-1", PathBuf::from("/tmp/b"), base());
        assert!(!ports_disjoint(&[a, b]));
    }

    #[test]
    fn pid_presence_marks_local_start() {
        let mut rec = NodeRecord::new(0, "forge-1", PathBuf::from("/tmp/a"), base());
        assert!(!rec.is_started_locally());
        rec.pid = Some(4242);
        assert!(rec.is_started_locally());
    }
}
