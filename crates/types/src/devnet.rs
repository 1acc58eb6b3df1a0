// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Cluster-wide metadata persisted for every devnet.

use crate::{ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
    str::FromStr,
    time::SystemTime,
};

/// The public network whose state (or genesis) seeds a devnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSource {
    Mainnet,
    Testnet,
}

impl Display for NetworkSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for NetworkSource {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => Err(ForgeError::precondition(format!("unknown network source: {other}"))),
        }
    }
}

/// How node processes run: docker containers or locally spawned binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Container,
    Local,
}

impl Display for ExecutionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Lifecycle of a devnet.
///
/// Transitions are monotone along Created -> Provisioned -> Running except
/// for the Running/Stopped cycle; anything may enter Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Created,
    Provisioned,
    Running,
    Stopped,
    Error,
}

impl LifecycleState {
    /// Whether the transition `self -> next` is allowed.
    pub fn can_transition(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Created, Provisioned)
                | (Provisioned, Running)
                // stopping something never started is a no-op, not a fault
                | (Provisioned, Stopped)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Error, Running)
                | (Error, Stopped)
                | (_, Error)
        )
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Provisioned => "provisioned",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Persisted description of one devnet cluster.
///
/// One instance lives at `devnet/metadata.json` under the home directory
/// and exclusively owns the per-node records beside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevnetMetadata {
    /// Chain id all nodes share.
    pub chain_id: String,
    /// Blockchain family name (resolves the network plugin).
    pub family: String,
    /// Source network whose state seeds the devnet.
    pub network: NetworkSource,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// Number of validator nodes.
    pub validators: usize,
    /// Number of funded non-validator accounts.
    pub accounts: usize,
    /// How node processes run.
    pub mode: ExecutionMode,
    /// Container image reference, when `mode` is container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Custom binary path, when `mode` is local with an external binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    /// Version the devnet first ran with. Immutable once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_version: Option<String>,
    /// Version the devnet currently runs. Advanced only by a successful
    /// upgrade or an explicit replace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    /// Where the cluster is in its lifecycle.
    pub lifecycle: LifecycleState,
}

impl DevnetMetadata {
    /// Create metadata for a freshly requested devnet.
    pub fn new(
        chain_id: impl Into<String>,
        family: impl Into<String>,
        network: NetworkSource,
        validators: usize,
        accounts: usize,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            family: family.into(),
            network,
            created_at: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
            validators,
            accounts,
            mode,
            image: None,
            binary_path: None,
            initial_version: None,
            current_version: None,
            lifecycle: LifecycleState::Created,
        }
    }

    /// Record the version the devnet first runs with.
    ///
    /// The initial version is write-once; a second call with a different
    /// value is a precondition failure.
    pub fn set_initial_version(&mut self, version: impl Into<String>) -> ForgeResult<()> {
        let version = version.into();
        match &self.initial_version {
            None => {
                self.initial_version = Some(version.clone());
                self.current_version = Some(version);
                Ok(())
            }
            Some(existing) if *existing == version => Ok(()),
            Some(existing) => Err(ForgeError::precondition(format!(
                "initial version already set to {existing}, refusing to overwrite with {version}"
            ))),
        }
    }

    /// Advance the current version after a successful upgrade or replace.
    pub fn advance_version(&mut self, version: impl Into<String>) {
        self.current_version = Some(version.into());
    }

    /// Move the lifecycle to `next`, enforcing the transition table.
    pub fn transition(&mut self, next: LifecycleState) -> ForgeResult<()> {
        if self.lifecycle == next {
            return Ok(());
        }
        if !self.lifecycle.can_transition(next) {
            return Err(ForgeError::precondition(format!(
                "devnet is {}, cannot move to {next}",
                self.lifecycle
            )));
        }
        self.lifecycle = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn meta() -> DevnetMetadata {
        DevnetMetadata::new("forge-1", "demo", NetworkSource::Testnet, 4, 2, ExecutionMode::Local)
    }

    #[test]
    fn initial_version_is_write_once() {
        let mut m = meta();
        m.set_initial_version("v1.0.0").unwrap();
        assert_eq!(m.current_version.as_deref(), Some("v1.0.0"));
        // idempotent with the same value
        m.set_initial_version("v1.0.0").unwrap();
        // rejected with a different one
        assert_matches!(
            m.set_initial_version("v2.0.0"),
            Err(ForgeError::PreconditionFailed { .. })
        );
        // upgrades only move the current version
        m.advance_version("v2.0.0");
        assert_eq!(m.initial_version.as_deref(), Some("v1.0.0"));
        assert_eq!(m.current_version.as_deref(), Some("v2.0.0"));
    }

    #[test]
    fn lifecycle_is_monotone_with_run_stop_cycle() {
        let mut m = meta();
        m.transition(LifecycleState::Provisioned).unwrap();
        m.transition(LifecycleState::Running).unwrap();
        m.transition(LifecycleState::Stopped).unwrap();
        m.transition(LifecycleState::Running).unwrap();
        // no going back to provisioning
        assert_matches!(
            m.transition(LifecycleState::Provisioned),
            Err(ForgeError::PreconditionFailed { .. })
        );
        // error is reachable from anywhere
        m.transition(LifecycleState::Error).unwrap();
    }

    #[test]
    fn metadata_round_trips_through_json() {
        let mut m = meta();
        m.set_initial_version("v1.2.3").unwrap();
        let json = serde_json::to_string(&m).unwrap();
        let back: DevnetMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }
}
