// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Parallel health probing.

use cf_rpc::RpcProbe;
use cf_types::{NodeHealth, NodeRecord, NodeStatus};
use futures::future::join_all;
use tracing::debug;

/// Probe every node concurrently and classify each.
///
/// `process_running[i]` says whether node `i`'s process (or container) is
/// alive; a node whose process runs but whose RPC does not answer yet is
/// `Starting`, not `Stopped`. Each probe is bounded by the probe's own
/// call timeout, so a dead node can never stall the sweep longer than
/// that.
pub async fn probe_cluster(
    probe: &RpcProbe,
    nodes: &[NodeRecord],
    process_running: &[bool],
) -> Vec<NodeHealth> {
    let probes = nodes.iter().map(|node| async move {
        (node.index, probe.height("127.0.0.1", node.ports.rpc).await)
    });

    let mut health: Vec<NodeHealth> = join_all(probes)
        .await
        .into_iter()
        .map(|(index, result)| match result {
            Ok(Some(view)) => NodeHealth {
                index,
                status: if view.catching_up { NodeStatus::Syncing } else { NodeStatus::Running },
                height: Some(view.height),
                peers: Some(view.peers),
                catching_up: view.catching_up,
                error: None,
            },
            Ok(None) => {
                let running = process_running.get(index).copied().unwrap_or(false);
                let mut node = NodeHealth::stopped(index);
                if running {
                    // process is up, RPC not listening yet
                    node.status = NodeStatus::Starting;
                }
                node
            }
            Err(e) => NodeHealth::error(index, e.to_string()),
        })
        .collect();

    health.sort_by_key(|h| h.index);
    debug!(target: "forge::cluster", nodes = health.len(), "cluster probed");
    health
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_types::{aggregate, ClusterStatus, NodePorts};
    use std::{path::PathBuf, time::Duration};

    fn record(index: usize, rpc: u16) -> NodeRecord {
        NodeRecord::new(
            index,
            "forge-1",
            PathBuf::from(format!("/tmp/node{index}")),
            NodePorts { rpc, p2p: 1, grpc: 2, api: 3, evm_rpc: 4, evm_ws: 5 },
        )
    }

    #[tokio::test]
    async fn unreachable_nodes_classify_by_process_state() {
        // nothing listens on these ports
        let l0 = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let l1 = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let p0 = l0.local_addr().unwrap().port();
        let p1 = l1.local_addr().unwrap().port();
        drop((l0, l1));

        let probe = RpcProbe::with_timeout(Duration::from_millis(300)).unwrap();
        let nodes = vec![record(0, p0), record(1, p1)];
        let health = probe_cluster(&probe, &nodes, &[true, false]).await;

        assert_eq!(health[0].status, NodeStatus::Starting);
        assert_eq!(health[1].status, NodeStatus::Stopped);
        assert_eq!(aggregate(&health), ClusterStatus::Stopped);
    }
}
