// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Atomic document stores for devnet metadata and node records.
//!
//! Every write lands in a temp file in the destination directory and is
//! renamed into place, so readers observe either the previous document or
//! the new one. A document that parses as garbage fails loudly as
//! [ForgeError::Corruption] instead of yielding a half-initialized value.

use crate::ForgeDirs;
use cf_types::{DevnetMetadata, ExecutionMode, ForgeError, ForgeResult, LifecycleState, NodeRecord};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, io, path::Path};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Write `bytes` to `path` via temp-file-plus-rename in the same directory.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent directory")
    })?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    io::Write::write_all(&mut tmp, bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> ForgeResult<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| ForgeError::corruption(path, format!("serialize: {e}")))?;
    atomic_write(path, &bytes)?;
    debug!(target: "forge::store", path = %path.display(), "document written");
    Ok(())
}

/// Load a JSON document. Missing file is `None`; a document that does not
/// parse is [ForgeError::Corruption].
pub fn load_json<T: DeserializeOwned>(path: &Path) -> ForgeResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| ForgeError::corruption(path, format!("parse: {e}")))?;
    Ok(Some(value))
}

/// Persisted state of the devnet under one home directory: the cluster
/// metadata plus its node records.
#[derive(Debug, Clone)]
pub struct DevnetStore {
    dirs: ForgeDirs,
}

impl DevnetStore {
    pub fn new(dirs: ForgeDirs) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &ForgeDirs {
        &self.dirs
    }

    pub fn save_metadata(&self, metadata: &DevnetMetadata) -> ForgeResult<()> {
        save_json(&self.dirs.metadata_path(), metadata)
    }

    /// Raw metadata load without liveness reconciliation.
    pub fn load_metadata_raw(&self) -> ForgeResult<Option<DevnetMetadata>> {
        load_json(&self.dirs.metadata_path())
    }

    pub fn save_node(&self, record: &NodeRecord) -> ForgeResult<()> {
        save_json(&self.dirs.node_record_path(record.index), record)
    }

    /// Load all node records in index order.
    ///
    /// Records are stored one per node directory; a gap in the index
    /// sequence means provisioning was interrupted and is corruption.
    pub fn load_nodes(&self, expected: usize) -> ForgeResult<Vec<NodeRecord>> {
        let mut nodes = Vec::with_capacity(expected);
        for index in 0..expected {
            let path = self.dirs.node_record_path(index);
            match load_json::<NodeRecord>(&path)? {
                Some(record) => nodes.push(record),
                None => {
                    return Err(ForgeError::corruption(
                        path,
                        format!("node record {index} missing for a {expected}-node devnet"),
                    ))
                }
            }
        }
        Ok(nodes)
    }

    /// Load the devnet, reconciling the persisted lifecycle against
    /// observable process state.
    ///
    /// A metadata document claiming `Running` while no node has a live pid
    /// (local mode) is downgraded to `Stopped` before it is returned, so a
    /// crashed cluster never reports as healthy.
    pub fn load(&self) -> ForgeResult<Option<(DevnetMetadata, Vec<NodeRecord>)>> {
        let Some(mut metadata) = self.load_metadata_raw()? else {
            return Ok(None);
        };
        let nodes = self.load_nodes(metadata.validators)?;

        if metadata.lifecycle == LifecycleState::Running
            && metadata.mode == ExecutionMode::Local
            && nodes.iter().all(|n| n.pid.is_none())
        {
            warn!(
                target: "forge::store",
                "metadata says running but no node has a pid; downgrading to stopped"
            );
            metadata.lifecycle = LifecycleState::Stopped;
        }

        Ok(Some((metadata, nodes)))
    }

    /// Load the devnet or fail with a precondition error naming the fix.
    pub fn load_required(&self) -> ForgeResult<(DevnetMetadata, Vec<NodeRecord>)> {
        self.load()?.ok_or_else(|| {
            ForgeError::precondition_with_hint(
                "no devnet exists under this home directory",
                "run `chainforge deploy` first",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_types::{NetworkSource, NodePorts};
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    fn store() -> (tempfile::TempDir, DevnetStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = DevnetStore::new(ForgeDirs::new(tmp.path()));
        (tmp, store)
    }

    fn sample(validators: usize) -> (DevnetMetadata, Vec<NodeRecord>) {
        let metadata = DevnetMetadata::new(
            "forge-1",
            "demo",
            NetworkSource::Testnet,
            validators,
            0,
            ExecutionMode::Local,
        );
        let base =
            NodePorts { rpc: 26657, p2p: 26656, grpc: 9090, api: 1317, evm_rpc: 8545, evm_ws: 8546 };
        let nodes = (0..validators)
            .map(|i| {
                NodeRecord::new(
                    i,
                    "forge-1",
                    PathBuf::from(format!("/tmp/node{i}")),
                    NodePorts::for_index(&base, i),
                )
            })
            .collect();
        (metadata, nodes)
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_tmp, store) = store();
        let (metadata, nodes) = sample(2);
        store.save_metadata(&metadata).unwrap();
        for node in &nodes {
            store.save_node(node).unwrap();
        }
        let (loaded, loaded_nodes) = store.load().unwrap().unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(loaded_nodes, nodes);
    }

    #[test]
    fn missing_devnet_loads_as_none() {
        let (_tmp, store) = store();
        assert!(store.load().unwrap().is_none());
        assert_matches!(store.load_required(), Err(ForgeError::PreconditionFailed { .. }));
    }

    #[test]
    fn truncated_metadata_fails_loudly() {
        let (_tmp, store) = store();
        let path = store.dirs().metadata_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{\"chain_id\": \"forge-1\", \"fam").unwrap();
        assert_matches!(store.load(), Err(ForgeError::Corruption { .. }));
    }

    #[test]
    fn missing_node_record_is_corruption() {
        let (_tmp, store) = store();
        let (metadata, nodes) = sample(3);
        store.save_metadata(&metadata).unwrap();
        // only two of three records make it to disk
        store.save_node(&nodes[0]).unwrap();
        store.save_node(&nodes[1]).unwrap();
        assert_matches!(store.load(), Err(ForgeError::Corruption { .. }));
    }

    #[test]
    fn running_without_pids_downgrades_to_stopped() {
        let (_tmp, store) = store();
        let (mut metadata, nodes) = sample(1);
        metadata.transition(LifecycleState::Provisioned).unwrap();
        metadata.transition(LifecycleState::Running).unwrap();
        store.save_metadata(&metadata).unwrap();
        store.save_node(&nodes[0]).unwrap();

        let (loaded, _) = store.load().unwrap().unwrap();
        assert_eq!(loaded.lifecycle, LifecycleState::Stopped);

        // with a pid present the claim stands
        let mut started = nodes[0].clone();
        started.pid = Some(1234);
        store.save_node(&started).unwrap();
        let (loaded, _) = store.load().unwrap().unwrap();
        assert_eq!(loaded.lifecycle, LifecycleState::Running);
    }
}
