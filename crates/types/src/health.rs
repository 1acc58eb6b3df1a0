// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Health classification for nodes and whole clusters.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Classified status of a single node probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Running,
    Syncing,
    Stopped,
    Starting,
    Error,
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Syncing => "syncing",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Result of probing one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub index: usize,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers: Option<usize>,
    pub catching_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeHealth {
    pub fn stopped(index: usize) -> Self {
        Self { index, status: NodeStatus::Stopped, height: None, peers: None, catching_up: false, error: None }
    }

    pub fn error(index: usize, detail: impl Into<String>) -> Self {
        Self {
            index,
            status: NodeStatus::Error,
            height: None,
            peers: None,
            catching_up: false,
            error: Some(detail.into()),
        }
    }

    fn is_live(&self) -> bool {
        matches!(self.status, NodeStatus::Running | NodeStatus::Syncing)
    }
}

/// Cluster-wide classification derived from per-node probes.
///
/// `Partial` is rendered as "Running" by the text surface but stays
/// distinct here and in JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
    Running,
    Partial,
    Stopped,
    Error,
}

impl ClusterStatus {
    /// Label shown to the user by the text renderer.
    pub fn user_facing(&self) -> &'static str {
        match self {
            Self::Running | Self::Partial => "Running",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }
}

impl Display for ClusterStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Partial => "partial",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Combine per-node probes into the cluster view.
pub fn aggregate(nodes: &[NodeHealth]) -> ClusterStatus {
    let live = nodes.iter().filter(|n| n.is_live()).count();
    if live == nodes.len() && live > 0 {
        ClusterStatus::Running
    } else if live > 0 {
        ClusterStatus::Partial
    } else if nodes.iter().any(|n| n.status == NodeStatus::Error) {
        ClusterStatus::Error
    } else {
        ClusterStatus::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(i: usize) -> NodeHealth {
        NodeHealth {
            index: i,
            status: NodeStatus::Running,
            height: Some(10),
            peers: Some(3),
            catching_up: false,
            error: None,
        }
    }

    fn syncing(i: usize) -> NodeHealth {
        NodeHealth { status: NodeStatus::Syncing, catching_up: true, ..running(i) }
    }

    #[test]
    fn all_live_is_running() {
        assert_eq!(aggregate(&[running(0), syncing(1)]), ClusterStatus::Running);
    }

    #[test]
    fn mixed_is_partial_even_with_errors() {
        let nodes = [running(0), NodeHealth::stopped(1), NodeHealth::error(2, "boom")];
        assert_eq!(aggregate(&nodes), ClusterStatus::Partial);
        assert_eq!(aggregate(&nodes).user_facing(), "Running");
    }

    #[test]
    fn no_live_nodes_with_error_is_error() {
        let nodes = [NodeHealth::stopped(0), NodeHealth::error(1, "exec format error")];
        assert_eq!(aggregate(&nodes), ClusterStatus::Error);
    }

    #[test]
    fn all_stopped_is_stopped() {
        assert_eq!(aggregate(&[NodeHealth::stopped(0)]), ClusterStatus::Stopped);
        assert_eq!(aggregate(&[]), ClusterStatus::Stopped);
    }
}
