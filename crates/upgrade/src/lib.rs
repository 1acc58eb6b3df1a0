// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Governance-driven upgrade orchestration.
//!
//! Six strictly ordered stages take a running devnet through an on-chain
//! software upgrade: verify reachability, submit the expedited proposal,
//! vote from every validator, wait for the upgrade height, switch every
//! node's binary, and verify the chain resumes. The orchestrator is pure
//! coordination: everything that touches a chain, a keyring or a process
//! goes through the three seams in [traits].

mod machine;
mod traits;

pub use machine::{UpgradeConfig, UpgradeOrchestrator};
pub use traits::{ChainReader, GovGateway, NodeSwitcher, VoteOutcome};
