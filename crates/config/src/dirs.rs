// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Where everything lives under the chainforge home directory.
//!
//! ```text
//! <home>/devnet/metadata.json             cluster metadata
//! <home>/devnet/node<i>/...               per-node home (config, data, log, pid)
//! <home>/cache/binaries/<network>/<family>/<ref>/<binary>
//! <home>/bin/<binary>                     active symbolic pointer per binary
//! <home>/exports/<timestamp>/...          genesis exports + metadata
//! ```

use std::path::{Path, PathBuf};

const DEFAULT_HOME_DIR: &str = ".chainforge";

/// Resolver for every path the tool touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgeDirs {
    home: PathBuf,
}

impl ForgeDirs {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// The default home: `~/.chainforge`, or a relative fallback when the
    /// platform reports no home directory.
    pub fn default_home() -> Self {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self { home: base.join(DEFAULT_HOME_DIR) }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Root of the (single) devnet this home manages.
    pub fn devnet_dir(&self) -> PathBuf {
        self.home.join("devnet")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.devnet_dir().join("metadata.json")
    }

    /// Home directory for node `index`.
    pub fn node_dir(&self, index: usize) -> PathBuf {
        self.devnet_dir().join(format!("node{index}"))
    }

    pub fn node_record_path(&self, index: usize) -> PathBuf {
        self.node_dir(index).join("node.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Root of the content-addressed binary store.
    pub fn cache_binaries_dir(&self) -> PathBuf {
        self.cache_dir().join("binaries")
    }

    /// Directory holding the per-binary active pointers.
    pub fn active_bin_dir(&self) -> PathBuf {
        self.home.join("bin")
    }

    /// The active symbolic pointer for `binary`.
    pub fn active_binary(&self, binary: &str) -> PathBuf {
        self.active_bin_dir().join(binary)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.home.join("exports")
    }

    /// Directory for one export, keyed by its capture timestamp.
    pub fn export_dir(&self, timestamp: u64) -> PathBuf {
        self.exports_dir().join(timestamp.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_the_documented_tree() {
        let dirs = ForgeDirs::new("/srv/forge");
        assert_eq!(dirs.metadata_path(), PathBuf::from("/srv/forge/devnet/metadata.json"));
        assert_eq!(dirs.node_dir(3), PathBuf::from("/srv/forge/devnet/node3"));
        assert_eq!(
            dirs.cache_binaries_dir(),
            PathBuf::from("/srv/forge/cache/binaries")
        );
        assert_eq!(dirs.active_binary("demod"), PathBuf::from("/srv/forge/bin/demod"));
        assert_eq!(dirs.export_dir(42), PathBuf::from("/srv/forge/exports/42"));
    }
}
