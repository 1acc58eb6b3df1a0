// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! The three seams the orchestrator coordinates across.

use async_trait::async_trait;
use cf_rpc::{GovParams, NodeProbe, ProposalStatus};
use cf_types::{ExecutionMode, ForgeResult};
use std::path::PathBuf;

/// Read-only view of the running chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Probe node `index`. `Ok(None)` means nothing answered there.
    async fn node_height(&self, index: usize) -> ForgeResult<Option<NodeProbe>>;

    /// Governance parameters (plugin-first, REST fallback).
    async fn governance_params(&self) -> ForgeResult<GovParams>;

    /// Where proposal `id` currently stands.
    async fn proposal_status(&self, id: u64) -> ForgeResult<ProposalStatus>;
}

/// What happened when a validator voted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Cast,
    /// The chain says this validator voted before. Success: votes are
    /// one-per-validator and the step is idempotent under retry.
    AlreadyVoted,
}

/// Writes governance transactions to the chain.
#[async_trait]
pub trait GovGateway: Send + Sync {
    /// Submit the expedited software-upgrade proposal, depositing the
    /// minimum expedited amount. Returns the on-chain proposal id once the
    /// submitting transaction is included in a block.
    async fn submit_upgrade(&self, upgrade_name: &str, height: u64) -> ForgeResult<u64>;

    /// Cast a YES vote from validator `index`'s key.
    async fn vote(&self, index: usize, proposal_id: u64) -> ForgeResult<VoteOutcome>;
}

/// Stops, reinstalls and restarts the cluster's nodes.
#[async_trait]
pub trait NodeSwitcher: Send + Sync {
    fn node_count(&self) -> usize;

    /// Graceful stop with escalation; idempotent on stopped nodes.
    async fn stop_node(&self, index: usize) -> ForgeResult<()>;

    /// Make the upgrade target available to every node. Called exactly once
    /// per upgrade: repoints the active binary pointer (local cache refs),
    /// copies an external binary into place, or pulls the container image.
    /// Per-node run command updates happen inside [Self::start_node].
    async fn install_target(&self) -> ForgeResult<()>;

    /// Restart node `index` with the same ports, home directory and
    /// moniker it had before the switch.
    async fn start_node(&self, index: usize) -> ForgeResult<()>;

    /// Tail of the node's log, for failure reports.
    async fn log_tail(&self, index: usize) -> Vec<String>;

    /// Deterministic genesis export (node stopped around the export).
    /// `label` distinguishes the pre and post captures.
    async fn export_genesis(&self, label: &str) -> ForgeResult<PathBuf>;

    /// Persist the upgraded version (and execution mode, when the upgrade
    /// changed it) into the devnet metadata.
    async fn finalize(&self, version: &str, mode: Option<ExecutionMode>) -> ForgeResult<()>;
}
