// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Cache reference normalization.
//!
//! A binary in the cache is identified by a normalized reference: the
//! version tag itself for tag refs, or a short commit digest for branch and
//! commit refs. Two branch names pointing at the same commit therefore
//! share one cache entry.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Length of the short commit digest used as a cache reference.
pub const SHORT_COMMIT_LEN: usize = 12;

/// A requested binary reference, classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryRef {
    /// A release tag: leading `v` followed by a digit (`v1.2.3`).
    Tag(String),
    /// Anything else: a branch name or a commit id.
    Custom(String),
}

impl BinaryRef {
    /// Classify a raw reference string.
    pub fn parse(raw: &str) -> Self {
        let mut chars = raw.chars();
        if chars.next() == Some('v') && chars.next().is_some_and(|c| c.is_ascii_digit()) {
            Self::Tag(raw.to_string())
        } else {
            Self::Custom(raw.to_string())
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, Self::Tag(_))
    }

    /// The raw reference as requested.
    pub fn raw(&self) -> &str {
        match self {
            Self::Tag(s) | Self::Custom(s) => s,
        }
    }

    /// The normalized cache reference: the tag itself, or the short digest
    /// of the commit the custom ref resolved to.
    pub fn cache_ref(&self, resolved_commit: &str) -> String {
        match self {
            Self::Tag(tag) => tag.clone(),
            Self::Custom(_) => short_commit(resolved_commit),
        }
    }
}

impl Display for BinaryRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw())
    }
}

/// First [SHORT_COMMIT_LEN] characters of a commit id.
pub fn short_commit(commit: &str) -> String {
    commit.chars().take(SHORT_COMMIT_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_and_custom_refs_classify() {
        assert!(BinaryRef::parse("v1.2.3").is_tag());
        assert!(BinaryRef::parse("v20.0.0-rc1").is_tag());
        assert!(!BinaryRef::parse("main").is_tag());
        assert!(!BinaryRef::parse("feature/ports").is_tag());
        // bare `v` prefix without a digit is a branch name
        assert!(!BinaryRef::parse("vnext").is_tag());
    }

    #[test]
    fn custom_refs_normalize_to_short_commit() {
        let commit = "0123456789abcdef0123456789abcdef01234567";
        let r = BinaryRef::parse("my-branch");
        assert_eq!(r.cache_ref(commit), "0123456789ab");
        // a tag keeps its own name regardless of commit
        assert_eq!(BinaryRef::parse("v1.0.0").cache_ref(commit), "v1.0.0");
    }
}
