// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Devnet cluster management.
//!
//! [Devnet] owns the persisted metadata and node records for one cluster
//! and drives provisioning, start/stop, resets and destruction. The
//! submodules supply the health prober, genesis exports, key dumps, and
//! the production implementations of the upgrade orchestrator's seams.

mod devnet;
mod export;
mod health;
mod keys;
mod seams;

pub use devnet::{Devnet, ProvisionSpec, CONTAINER_HOME};
pub use export::{export_metadata_path, inspect_export, list_exports, ExportRecord};
pub use health::probe_cluster;
pub use keys::export_keys;
pub use seams::{CliGovGateway, ClusterProbe, ClusterSwitcher, SwitchTarget, TxRunner};
