// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Shared data model for chainforge.
//!
//! Everything the stores persist and the stages emit lives here so the
//! leaf crates agree on one vocabulary: devnet metadata, node records,
//! health classification, upgrade plans and progress events, and the
//! error kinds every command boundary maps onto.

mod devnet;
mod error;
mod health;
mod node;
mod reference;
mod upgrade;

pub use devnet::{DevnetMetadata, ExecutionMode, LifecycleState, NetworkSource};
pub use error::{ForgeError, ForgeResult};
pub use health::{aggregate, ClusterStatus, NodeHealth, NodeStatus};
pub use node::{ports_disjoint, NodePorts, NodeRecord, NodeRole, PORT_STRIDE};
pub use reference::{short_commit, BinaryRef, SHORT_COMMIT_LEN};
pub use upgrade::{
    HeightBuffer, UpgradeEvent, UpgradePlan, UpgradeStage, UpgradeSummary, UpgradeTarget,
};
