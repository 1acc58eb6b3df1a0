// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed store of built node binaries.
//!
//! A binary is keyed by `(network, family, cache ref)` and lives at
//! `<root>/<network>/<family>/<ref>/<binary>`. Entries are immutable once
//! written; same-identity writers serialize on a per-identity file lock and
//! the loser adopts the winner's file. The per-binary "currently active"
//! pointer is a symlink under `bin/` that is only ever updated by
//! link-then-rename, so a reader following it always lands on the old
//! target or the new one.

mod validate;

pub use validate::{validate, ValidateOutcome};

use cf_types::{ForgeError, ForgeResult, NetworkSource};
use fs2::FileExt;
use std::{
    fs::{self, File},
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, info};

/// Identity triple of a cached binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIdentity {
    pub family: String,
    pub network: NetworkSource,
    /// Normalized version tag or short commit digest.
    pub cache_ref: String,
}

impl CacheIdentity {
    pub fn new(family: impl Into<String>, network: NetworkSource, cache_ref: impl Into<String>) -> Self {
        Self { family: family.into(), network, cache_ref: cache_ref.into() }
    }
}

/// A binary found in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedBinary {
    pub identity: CacheIdentity,
    pub binary: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// The store rooted at `cache/binaries` plus the active pointer directory.
#[derive(Debug, Clone)]
pub struct BinaryCache {
    root: PathBuf,
    bin_dir: PathBuf,
}

impl BinaryCache {
    /// `root` is the `cache/binaries` directory; `bin_dir` holds the active
    /// pointers.
    pub fn new(root: impl Into<PathBuf>, bin_dir: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), bin_dir: bin_dir.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, id: &CacheIdentity) -> PathBuf {
        self.root.join(id.network.to_string()).join(&id.family).join(&id.cache_ref)
    }

    /// Final path of the binary for `id`.
    pub fn entry_path(&self, id: &CacheIdentity, binary: &str) -> PathBuf {
        self.entry_dir(id).join(binary)
    }

    /// The cached binary for `id`, if one has been produced.
    pub fn lookup(&self, id: &CacheIdentity, binary: &str) -> Option<CachedBinary> {
        let path = self.entry_path(id, binary);
        let meta = fs::metadata(&path).ok()?;
        Some(CachedBinary {
            identity: id.clone(),
            binary: binary.to_string(),
            path,
            modified: meta.modified().ok()?,
            size: meta.len(),
        })
    }

    /// Produce-or-adopt the binary for `id`.
    ///
    /// Writers of the same identity serialize on a per-identity file lock.
    /// The first holder runs `producer` against a temp path and renames the
    /// result into place; later holders find the file present and return it
    /// without producing anything. The cache is never left holding a
    /// partial product: a failing producer only discards its temp file.
    pub fn store<F>(&self, id: &CacheIdentity, binary: &str, producer: F) -> ForgeResult<CachedBinary>
    where
        F: FnOnce(&Path) -> ForgeResult<()>,
    {
        let dir = self.entry_dir(id);
        fs::create_dir_all(&dir)?;

        let _lock = IdentityLock::acquire(&dir)?;

        if let Some(existing) = self.lookup(id, binary) {
            debug!(
                target: "forge::cache",
                path = %existing.path.display(),
                "identity already produced; discarding duplicate work"
            );
            return Ok(existing);
        }

        let tmp = tempfile::Builder::new().prefix(".producing-").tempfile_in(&dir)?;
        let tmp_path = tmp.path().to_path_buf();
        producer(&tmp_path)?;

        let mut perms = fs::metadata(&tmp_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&tmp_path, perms)?;

        let final_path = self.entry_path(id, binary);
        tmp.persist(&final_path)
            .map_err(|e| ForgeError::corruption(&final_path, format!("persist: {e}")))?;

        info!(target: "forge::cache", path = %final_path.display(), "binary cached");
        self.lookup(id, binary).ok_or_else(|| {
            ForgeError::corruption(&final_path, "entry vanished after store".to_string())
        })
    }

    /// Atomically repoint the active pointer for `binary` to `target`.
    ///
    /// The new symlink is created beside the pointer and renamed over it;
    /// rename is the sole update discipline so no reader ever observes a
    /// missing pointer.
    pub fn activate(&self, binary: &str, target: &Path) -> ForgeResult<PathBuf> {
        fs::create_dir_all(&self.bin_dir)?;
        let pointer = self.bin_dir.join(binary);
        let staging = self.bin_dir.join(format!(".{binary}.new"));

        // a stale staging link from an interrupted activate is harmless
        let _ = fs::remove_file(&staging);
        symlink(target, &staging)?;
        fs::rename(&staging, &pointer)?;

        info!(
            target: "forge::cache",
            pointer = %pointer.display(),
            target = %target.display(),
            "active pointer updated"
        );
        Ok(pointer)
    }

    /// Where the active pointer for `binary` currently points, if set.
    pub fn active_target(&self, binary: &str) -> Option<PathBuf> {
        fs::read_link(self.bin_dir.join(binary)).ok()
    }

    /// Path of the active pointer for `binary` (whether or not it exists).
    pub fn active_pointer(&self, binary: &str) -> PathBuf {
        self.bin_dir.join(binary)
    }

    /// Enumerate cached binaries named `binary`, across one network or all.
    pub fn scan(&self, network: Option<NetworkSource>, binary: &str) -> ForgeResult<Vec<CachedBinary>> {
        let networks = match network {
            Some(n) => vec![n],
            None => vec![NetworkSource::Mainnet, NetworkSource::Testnet],
        };

        let mut entries = Vec::new();
        for network in networks {
            let network_dir = self.root.join(network.to_string());
            let families = match fs::read_dir(&network_dir) {
                Ok(read) => read,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for family in families {
                let family = family?;
                let family_name = family.file_name().to_string_lossy().to_string();
                for reference in fs::read_dir(family.path())? {
                    let reference = reference?;
                    let cache_ref = reference.file_name().to_string_lossy().to_string();
                    let id = CacheIdentity::new(family_name.clone(), network, cache_ref);
                    if let Some(entry) = self.lookup(&id, binary) {
                        entries.push(entry);
                    }
                }
            }
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(entries)
    }

    /// Delete the whole store. Used by `destroy --purge-cache`.
    pub fn purge(&self) -> ForgeResult<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Exclusive per-identity lock, held for the duration of a store.
struct IdentityLock {
    file: File,
}

impl IdentityLock {
    fn acquire(dir: &Path) -> ForgeResult<Self> {
        let file = File::create(dir.join(".lock"))?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for IdentityLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    };

    fn cache() -> (tempfile::TempDir, BinaryCache) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(tmp.path().join("cache/binaries"), tmp.path().join("bin"));
        (tmp, cache)
    }

    fn id(r: &str) -> CacheIdentity {
        CacheIdentity::new("demo", NetworkSource::Testnet, r)
    }

    #[test]
    fn store_then_lookup_round_trips() {
        let (_tmp, cache) = cache();
        let entry = cache
            .store(&id("v1.0.0"), "demod", |tmp| {
                fs::write(tmp, b"#!/bin/sh\necho v1.0.0\n")?;
                Ok(())
            })
            .unwrap();
        assert!(entry.path.ends_with("testnet/demo/v1.0.0/demod"));

        let found = cache.lookup(&id("v1.0.0"), "demod").unwrap();
        assert_eq!(found.path, entry.path);
        assert_eq!(found.size, entry.size);
        // produced binaries are executable
        let mode = fs::metadata(&found.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }

    #[test]
    fn second_store_discards_the_duplicate() {
        let (_tmp, cache) = cache();
        let produced = AtomicUsize::new(0);
        let produce = |bytes: &'static [u8]| {
            move |tmp: &Path| {
                fs::write(tmp, bytes)?;
                Ok(())
            }
        };

        cache.store(&id("v1.0.0"), "demod", produce(b"first")).unwrap();
        let entry = cache
            .store(&id("v1.0.0"), "demod", |tmp: &Path| {
                produced.fetch_add(1, Ordering::SeqCst);
                fs::write(tmp, b"second")?;
                Ok(())
            })
            .unwrap();

        // the late writer never ran and sees the first bytes
        assert_eq!(produced.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read(&entry.path).unwrap(), b"first");
    }

    #[test]
    fn concurrent_stores_converge_to_one_product() {
        let (_tmp, cache) = cache();
        let cache = Arc::new(cache);
        let produced = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let produced = produced.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .store(&id("deadbeef0123"), "demod", |tmp| {
                            produced.fetch_add(1, Ordering::SeqCst);
                            fs::write(tmp, b"the one true binary")?;
                            Ok(())
                        })
                        .unwrap()
                })
            })
            .collect();

        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        for entry in entries {
            assert_eq!(fs::read(&entry.path).unwrap(), b"the one true binary");
        }
    }

    #[test]
    fn failed_producer_leaves_no_entry() {
        let (_tmp, cache) = cache();
        let result = cache.store(&id("v9.9.9"), "demod", |_tmp| {
            Err(ForgeError::unavailable("build", "compiler exploded"))
        });
        assert!(result.is_err());
        assert!(cache.lookup(&id("v9.9.9"), "demod").is_none());
    }

    #[test]
    fn activate_swaps_atomically_and_readers_never_miss() {
        let (tmp, cache) = cache();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        cache.activate("demod", &a).unwrap();
        assert_eq!(cache.active_target("demod").unwrap(), a);

        let pointer = cache.active_pointer("demod");
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut reads = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    // the pointer must resolve on every read
                    fs::read_link(&pointer).expect("active pointer missing");
                    reads += 1;
                }
                reads
            })
        };

        for _ in 0..200 {
            cache.activate("demod", &b).unwrap();
            cache.activate("demod", &a).unwrap();
        }
        stop.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() > 0);
        assert_eq!(cache.active_target("demod").unwrap(), a);
    }

    #[test]
    fn scan_recovers_identity_from_layout() {
        let (_tmp, cache) = cache();
        for r in ["v1.0.0", "v2.0.0", "0123456789ab"] {
            cache
                .store(&id(r), "demod", |tmp| {
                    fs::write(tmp, r.as_bytes())?;
                    Ok(())
                })
                .unwrap();
        }
        let other = CacheIdentity::new("demo", NetworkSource::Mainnet, "v1.0.0");
        cache
            .store(&other, "demod", |tmp| {
                fs::write(tmp, b"mainnet build")?;
                Ok(())
            })
            .unwrap();

        let testnet = cache.scan(Some(NetworkSource::Testnet), "demod").unwrap();
        assert_eq!(testnet.len(), 3);
        assert!(testnet.iter().all(|e| e.identity.network == NetworkSource::Testnet));

        let all = cache.scan(None, "demod").unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().any(|e| e.identity.network == NetworkSource::Mainnet));
        assert!(all.iter().any(|e| e.identity.cache_ref == "0123456789ab"));
    }
}
