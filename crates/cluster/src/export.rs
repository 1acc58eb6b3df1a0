// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Genesis exports.
//!
//! An export captures the chain state as a genesis document under
//! `exports/<timestamp>/`, beside a metadata record carrying the block
//! height, the digest prefix of the binary that produced it, and the
//! source network tag. Exports run with the node stopped so the document
//! is deterministic.

use crate::Devnet;
use cf_config::{load_json, save_json, ForgeDirs};
use cf_types::{ExecutionMode, ForgeError, ForgeResult, NetworkSource};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::info;

/// Characters of the sha256 digest kept in export metadata.
const DIGEST_PREFIX_LEN: usize = 12;

/// Metadata document written beside every exported genesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub label: String,
    pub height: u64,
    /// Digest prefix of the binary (or image reference) that produced the
    /// export.
    pub binary_digest: String,
    pub network: NetworkSource,
    pub created_at: String,
}

/// Path of the metadata document inside an export directory.
pub fn export_metadata_path(export_dir: &Path) -> PathBuf {
    export_dir.join("metadata.json")
}

impl Devnet {
    /// Export the chain state of node 0 as a genesis document.
    ///
    /// The node is stopped for the export and restarted afterwards if it
    /// was running. Returns the export directory.
    pub async fn export_genesis(&mut self, label: &str) -> ForgeResult<PathBuf> {
        let was_running = self.node_running(0).await;
        if was_running {
            self.stop_node(0).await?;
        }

        let result = self.run_export(label).await;

        if was_running {
            self.start_node(0).await?;
        }
        result
    }

    async fn run_export(&mut self, label: &str) -> ForgeResult<PathBuf> {
        let node_home = self.nodes()[0].home.clone();
        let output = match self.metadata().mode {
            ExecutionMode::Local => {
                let args = self.plugin().export_args(&node_home);
                let out = tokio::process::Command::new(self.local_binary())
                    .args(&args)
                    .output()
                    .await
                    .map_err(|e| ForgeError::unavailable("node binary", e.to_string()))?;
                if !out.status.success() {
                    return Err(ForgeError::unavailable(
                        "state export",
                        String::from_utf8_lossy(&out.stderr).trim().to_string(),
                    ));
                }
                // some families print the document on stderr
                if out.stdout.trim_ascii().is_empty() { out.stderr } else { out.stdout }
            }
            ExecutionMode::Container => {
                let image = self.metadata().image.clone().ok_or_else(|| {
                    ForgeError::precondition("container mode devnet has no image recorded")
                })?;
                let args =
                    self.plugin().export_args(Path::new(crate::CONTAINER_HOME));
                let mut cmd = vec![self.plugin().binary_name().to_string()];
                cmd.extend(args);
                let lines = self.executor()?.run_once(
                    &format!("{}-export", self.metadata().chain_id),
                    &image,
                    cmd,
                    vec![(node_home, crate::CONTAINER_HOME.to_string())],
                )
                .await?;
                lines.join("\n").into_bytes()
            }
        };

        let genesis: serde_json::Value = serde_json::from_slice(&output)
            .map_err(|e| ForgeError::corruption("exported genesis", format!("parse: {e}")))?;
        let height = genesis
            .get("initial_height")
            .and_then(|v| v.as_str().map(|s| s.parse().ok()).unwrap_or_else(|| v.as_u64()))
            .unwrap_or(0);

        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock").as_secs();
        let export_dir = self.store().dirs().export_dir(timestamp);
        fs::create_dir_all(&export_dir)?;
        let pretty = serde_json::to_vec_pretty(&genesis)
            .map_err(|e| ForgeError::corruption("exported genesis", format!("serialize: {e}")))?;
        fs::write(export_dir.join("genesis.json"), pretty)?;

        let record = ExportRecord {
            label: label.to_string(),
            height,
            binary_digest: self.binary_digest()?,
            network: self.metadata().network,
            created_at: humantime_now(),
        };
        save_json(&export_metadata_path(&export_dir), &record)?;

        info!(
            target: "forge::cluster",
            dir = %export_dir.display(),
            height,
            label,
            "genesis exported"
        );
        Ok(export_dir)
    }

    async fn node_running(&self, index: usize) -> bool {
        match self.metadata().mode {
            ExecutionMode::Local => self.nodes()[index]
                .pid
                .map(|pid| self.local_executor().is_alive(cf_process::LocalHandle { pid }))
                .unwrap_or(false),
            ExecutionMode::Container => match (self.executor(), &self.nodes()[index].container_name)
            {
                (Ok(executor), Some(name)) => executor.is_running(name).await,
                _ => false,
            },
        }
    }

    /// Digest prefix identifying what the nodes run: the binary file's
    /// sha256 in local mode, the image reference's in container mode.
    fn binary_digest(&self) -> ForgeResult<String> {
        let digest = match self.metadata().mode {
            ExecutionMode::Local => {
                let bytes = fs::read(self.local_binary())?;
                Sha256::digest(&bytes)
            }
            ExecutionMode::Container => {
                let image = self.metadata().image.clone().unwrap_or_default();
                Sha256::digest(image.as_bytes())
            }
        };
        Ok(hex::encode(digest)[..DIGEST_PREFIX_LEN].to_string())
    }
}

/// All exports under the home, newest first.
pub fn list_exports(dirs: &ForgeDirs) -> ForgeResult<Vec<(u64, ExportRecord)>> {
    let mut exports = Vec::new();
    let read = match fs::read_dir(dirs.exports_dir()) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(exports),
        Err(e) => return Err(e.into()),
    };
    for entry in read {
        let entry = entry?;
        let Some(timestamp) = entry.file_name().to_string_lossy().parse::<u64>().ok() else {
            continue;
        };
        if let Some(record) = load_json(&export_metadata_path(&entry.path()))? {
            exports.push((timestamp, record));
        }
    }
    exports.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(exports)
}

/// Load one export's record by timestamp.
pub fn inspect_export(dirs: &ForgeDirs, timestamp: u64) -> ForgeResult<ExportRecord> {
    let dir = dirs.export_dir(timestamp);
    load_json(&export_metadata_path(&dir))?.ok_or_else(|| {
        ForgeError::precondition(format!("no export at {}", dir.display()))
    })
}

/// RFC3339 seconds, same format the metadata store uses.
fn humantime_now() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_listing_is_newest_first_and_skips_junk() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ForgeDirs::new(tmp.path());
        for (ts, height) in [(100u64, 10u64), (300, 30), (200, 20)] {
            let dir = dirs.export_dir(ts);
            fs::create_dir_all(&dir).unwrap();
            let record = ExportRecord {
                label: "pre".into(),
                height,
                binary_digest: "abcdef012345".into(),
                network: NetworkSource::Testnet,
                created_at: "2026-08-01T00:00:00Z".into(),
            };
            save_json(&export_metadata_path(&dir), &record).unwrap();
        }
        // a stray directory without metadata is ignored
        fs::create_dir_all(dirs.exports_dir().join("not-a-timestamp")).unwrap();

        let exports = list_exports(&dirs).unwrap();
        assert_eq!(exports.len(), 3);
        assert_eq!(exports[0].0, 300);
        assert_eq!(exports[0].1.height, 30);

        let record = inspect_export(&dirs, 200).unwrap();
        assert_eq!(record.height, 20);
        assert!(inspect_export(&dirs, 999).is_err());
    }
}
