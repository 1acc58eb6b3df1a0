// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Error kinds shared across the workspace.
//!
//! Each variant is one of the failure classes a command can surface; the
//! crates build these directly instead of inventing local taxonomies so the
//! CLI boundary can map any failure to an exit code and a recovery hint
//! without downcasting.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used by every crate that fails with [ForgeError].
pub type ForgeResult<T> = Result<T, ForgeError>;

/// Exit code reserved for operator cancellation (Ctrl-C or prompt abort).
pub const EXIT_CANCELLED: i32 = 130;

/// The failure classes a chainforge command can surface.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// The command's preconditions do not hold (devnet not running, missing
    /// binary, missing upgrade name, ...).
    #[error("precondition failed: {reason}")]
    PreconditionFailed { reason: String, hint: Option<String> },

    /// A collaborator the core depends on is unreachable or absent.
    #[error("{what} unavailable: {detail}")]
    ExternalUnavailable { what: String, detail: String },

    /// The chain accepted the request transport-wise but rejected it.
    #[error("chain rejected {operation}: {message}")]
    ChainRejected { operation: String, message: String },

    /// A bounded wait elapsed without reaching its completion criterion.
    #[error("timed out {operation}")]
    Timeout { operation: String, hint: Option<String> },

    /// Some nodes completed an operation and some did not.
    #[error("partial failure: nodes {failed:?} did not recover (ok: {succeeded:?})")]
    PartialFailure { succeeded: Vec<usize>, failed: Vec<usize>, detail: String },

    /// The operator interrupted the command.
    #[error("cancelled")]
    Cancelled,

    /// Persisted state or a cached artifact failed validation.
    #[error("corrupt state at {path}: {detail}")]
    Corruption { path: PathBuf, detail: String },

    /// Untyped failure bubbling up from std or a collaborator crate.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    /// Build a [ForgeError::PreconditionFailed] without a hint.
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed { reason: reason.into(), hint: None }
    }

    /// Build a [ForgeError::PreconditionFailed] carrying a recovery hint.
    pub fn precondition_with_hint(reason: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::PreconditionFailed { reason: reason.into(), hint: Some(hint.into()) }
    }

    /// Build a [ForgeError::ExternalUnavailable].
    pub fn unavailable(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ExternalUnavailable { what: what.into(), detail: detail.into() }
    }

    /// Build a [ForgeError::ChainRejected].
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChainRejected { operation: operation.into(), message: message.into() }
    }

    /// Build a [ForgeError::Timeout].
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout { operation: operation.into(), hint: None }
    }

    /// Build a [ForgeError::Corruption].
    pub fn corruption(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::Corruption { path: path.into(), detail: detail.into() }
    }

    /// Recovery hint for the operator, when one applies.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::PreconditionFailed { hint, .. } | Self::Timeout { hint, .. } => hint.as_deref(),
            Self::ChainRejected { .. } => {
                Some("the transaction may have landed; inspect the chain before retrying")
            }
            Self::PartialFailure { .. } => Some("run `chainforge status` to see which nodes are up"),
            Self::Corruption { .. } => {
                Some("the on-disk state is damaged; `reset --hard` rebuilds the devnet")
            }
            _ => None,
        }
    }

    /// Machine-readable kind label, stable across releases (part of the JSON
    /// error contract).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::ExternalUnavailable { .. } => "external_unavailable",
            Self::ChainRejected { .. } => "chain_rejected",
            Self::Timeout { .. } => "timeout",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Cancelled => "cancelled",
            Self::Corruption { .. } => "corruption",
            Self::Io(_) => "io",
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => EXIT_CANCELLED,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_maps_to_130() {
        assert_eq!(ForgeError::Cancelled.exit_code(), 130);
        assert_eq!(ForgeError::precondition("nope").exit_code(), 1);
    }

    #[test]
    fn hints_surface_for_recoverable_kinds() {
        let err = ForgeError::PartialFailure {
            succeeded: vec![0, 1],
            failed: vec![2],
            detail: "node2 refused to restart".into(),
        };
        assert!(err.hint().unwrap().contains("status"));
        assert!(ForgeError::Cancelled.hint().is_none());
    }
}
