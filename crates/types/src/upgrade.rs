// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Upgrade plans and the progress events the orchestrator emits.

use crate::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
    time::Duration,
};

/// What the cluster should run after the upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeTarget {
    /// A container image reference (`registry/chain:v2.0.0`).
    Image(String),
    /// A normalized binary cache reference.
    CacheRef(String),
    /// An external binary path copied into place.
    Path(PathBuf),
}

impl Display for UpgradeTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image(image) => write!(f, "{image}"),
            Self::CacheRef(r) => write!(f, "{r}"),
            Self::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// How many blocks of headroom to leave between the end of voting and the
/// upgrade height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeightBuffer {
    /// Derive a small multiple of the measured block time.
    Auto,
    /// An explicit block count.
    Blocks(u64),
}

impl Default for HeightBuffer {
    fn default() -> Self {
        Self::Auto
    }
}

/// Everything one upgrade command needs. Owned by the invoking command and
/// discarded when it finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradePlan {
    /// On-chain upgrade handler name; must be unique among accepted
    /// proposals.
    pub name: String,
    pub target: UpgradeTarget,
    /// Version string recorded as `current_version` on success.
    pub version: String,
    /// Overrides the devnet's execution mode when the upgrade changes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    /// Overrides the chain's expedited voting period.
    #[serde(default, with = "humantime_serde::option")]
    pub voting_period: Option<Duration>,
    #[serde(default)]
    pub height_buffer: HeightBuffer,
    /// Capture genesis exports before submitting and after resuming.
    #[serde(default)]
    pub export_genesis: bool,
}

/// Identifier of an orchestrator stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeStage {
    Verifying,
    Submitting,
    Voting,
    Waiting,
    Switching,
    VerifyingResume,
    Completed,
    Failed,
}

impl Display for UpgradeStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Verifying => "verifying",
            Self::Submitting => "submitting",
            Self::Voting => "voting",
            Self::Waiting => "waiting",
            Self::Switching => "switching",
            Self::VerifyingResume => "verifying-resume",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Success summary carried by the terminal [UpgradeEvent::Completed].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeSummary {
    pub proposal_id: u64,
    pub upgrade_height: u64,
    pub post_upgrade_height: u64,
    pub new_version: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_export: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_export: Option<PathBuf>,
}

/// Progress event written to the bounded upgrade event stream.
///
/// The surface layer renders these; the orchestrator never prints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpgradeEvent {
    Verifying { nodes: usize },
    Submitting { current_height: u64, target_height: u64 },
    Voting { votes_cast: usize, votes_required: usize },
    Waiting { current_height: u64, target_height: u64 },
    Switching { node_index: usize, nodes: usize },
    VerifyingResume { height: u64, target_height: u64 },
    Completed(UpgradeSummary),
    Failed { stage: UpgradeStage, cause: String, hint: Option<String> },
}

impl UpgradeEvent {
    /// The stage this event belongs to.
    pub fn stage(&self) -> UpgradeStage {
        match self {
            Self::Verifying { .. } => UpgradeStage::Verifying,
            Self::Submitting { .. } => UpgradeStage::Submitting,
            Self::Voting { .. } => UpgradeStage::Voting,
            Self::Waiting { .. } => UpgradeStage::Waiting,
            Self::Switching { .. } => UpgradeStage::Switching,
            Self::VerifyingResume { .. } => UpgradeStage::VerifyingResume,
            Self::Completed(_) => UpgradeStage::Completed,
            Self::Failed { .. } => UpgradeStage::Failed,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_know_their_stage() {
        let e = UpgradeEvent::Voting { votes_cast: 1, votes_required: 4 };
        assert_eq!(e.stage(), UpgradeStage::Voting);
        assert!(!e.is_terminal());

        let f = UpgradeEvent::Failed {
            stage: UpgradeStage::Switching,
            cause: "node 2 did not restart".into(),
            hint: None,
        };
        assert!(f.is_terminal());
    }

    #[test]
    fn plan_round_trips_with_humantime_durations() {
        let plan = UpgradePlan {
            name: "v2.0.0-upgrade".into(),
            target: UpgradeTarget::CacheRef("v2.0.0".into()),
            version: "v2.0.0".into(),
            mode: None,
            voting_period: Some(Duration::from_secs(60)),
            height_buffer: HeightBuffer::Blocks(5),
            export_genesis: true,
        };
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"1m\""));
        let back: UpgradePlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.voting_period, Some(Duration::from_secs(60)));
    }
}
