// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Build coordination: turn a version reference into a runnable binary.
//!
//! The coordinator normalizes the requested reference (tag or custom),
//! consults the binary cache, and only drives the external build
//! collaborator on a miss. Same-identity builds are serialized by the
//! cache's per-identity lock, so a second concurrent request blocks until
//! the first finishes and then adopts its product.

mod git;

pub use git::GitMakeBuilder;

use async_trait::async_trait;
use cf_cache::{validate, BinaryCache, CacheIdentity, ValidateOutcome};
use cf_plugin::NetworkPlugin;
use cf_types::{BinaryRef, ForgeError, ForgeResult, NetworkSource};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Progress events streamed to the surface layer during a build.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildProgress {
    Resolving { reference: String },
    CacheHit { path: PathBuf },
    Building { step: String },
    Built { path: PathBuf },
    Activated { pointer: PathBuf },
}

/// One build request.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub network: NetworkSource,
    /// Raw reference: a tag (`v1.2.3`) or branch/commit.
    pub reference: String,
    /// Whether the product belongs in the shared cache.
    pub to_cache: bool,
    /// Whether to repoint the active pointer at the product. Deploy and
    /// replace do; an upgrade defers activation to its switching stage.
    pub activate: bool,
}

/// What a completed build hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    /// Path of the runnable binary.
    pub path: PathBuf,
    /// Normalized cache reference the product was filed under.
    pub cache_ref: String,
    /// Full commit id, when the reference was custom.
    pub commit: Option<String>,
}

/// External build collaborator: resolves refs and compiles binaries.
#[async_trait]
pub trait BinaryBuilder: Send + Sync {
    /// Resolve `reference` in `repo` to a full commit id.
    async fn resolve_commit(&self, repo: &str, reference: &str) -> ForgeResult<String>;

    /// Compile `reference` of `repo` and leave the binary at `dest`.
    async fn build(
        &self,
        repo: &str,
        reference: &str,
        binary: &str,
        dest: &Path,
        progress: &mpsc::Sender<BuildProgress>,
    ) -> ForgeResult<()>;
}

/// Drives cache lookup, build, store and activation.
pub struct BuildCoordinator<B> {
    cache: BinaryCache,
    builder: B,
}

impl<B: BinaryBuilder> BuildCoordinator<B> {
    pub fn new(cache: BinaryCache, builder: B) -> Self {
        Self { cache, builder }
    }

    pub fn cache(&self) -> &BinaryCache {
        &self.cache
    }

    /// Produce a runnable binary for `request`, preferring the cache.
    ///
    /// Must run on a multi-threaded runtime: the same-identity serialization
    /// happens on a blocking file lock.
    pub async fn obtain(
        &self,
        plugin: &dyn NetworkPlugin,
        request: &BuildRequest,
        progress: &mpsc::Sender<BuildProgress>,
    ) -> ForgeResult<BuildOutput> {
        let binary = plugin.binary_name();
        let repo = plugin.source_repo();
        let reference = BinaryRef::parse(&request.reference);

        let _ = progress
            .send(BuildProgress::Resolving { reference: request.reference.clone() })
            .await;

        // custom refs are deduplicated by commit, not by name
        let (cache_ref, commit) = match &reference {
            BinaryRef::Tag(tag) => (tag.clone(), None),
            BinaryRef::Custom(raw) => {
                let commit = self.builder.resolve_commit(repo, raw).await?;
                (reference.cache_ref(&commit), Some(commit))
            }
        };
        let expected = commit.as_deref().unwrap_or(&cache_ref).to_string();
        let id = CacheIdentity::new(plugin.name(), request.network, cache_ref.clone());

        if let Some(entry) = self.cache.lookup(&id, binary) {
            match validate(&entry, Some(&expected)).await? {
                ValidateOutcome::Valid { .. } => {
                    let _ = progress.send(BuildProgress::CacheHit { path: entry.path.clone() }).await;
                    return self.finish(binary, entry.path, cache_ref, commit, request, progress).await;
                }
                ValidateOutcome::VersionMismatch { probed, expected } => {
                    // most likely a short-digest collision; never substitute
                    return Err(ForgeError::corruption(
                        entry.path,
                        format!("cached binary reports {probed}, expected {expected}"),
                    ));
                }
                outcome => {
                    warn!(
                        target: "forge::build",
                        path = %entry.path.display(),
                        ?outcome,
                        "cached binary failed validation; rebuilding"
                    );
                    std::fs::remove_file(&entry.path)?;
                }
            }
        }

        let path = if request.to_cache {
            self.build_into_cache(repo, &reference, binary, &id, progress).await?
        } else {
            self.build_direct(repo, &reference, binary, &cache_ref, progress).await?
        };
        let _ = progress.send(BuildProgress::Built { path: path.clone() }).await;

        self.finish(binary, path, cache_ref, commit, request, progress).await
    }

    async fn finish(
        &self,
        binary: &str,
        path: PathBuf,
        cache_ref: String,
        commit: Option<String>,
        request: &BuildRequest,
        progress: &mpsc::Sender<BuildProgress>,
    ) -> ForgeResult<BuildOutput> {
        if request.activate {
            let pointer = self.cache.activate(binary, &path)?;
            let _ = progress.send(BuildProgress::Activated { pointer }).await;
        }
        Ok(BuildOutput { path, cache_ref, commit })
    }

    /// Build under the cache's per-identity lock so concurrent requests for
    /// one identity run the build exactly once.
    async fn build_into_cache(
        &self,
        repo: &str,
        reference: &BinaryRef,
        binary: &str,
        id: &CacheIdentity,
        progress: &mpsc::Sender<BuildProgress>,
    ) -> ForgeResult<PathBuf> {
        let handle = tokio::runtime::Handle::current();
        let entry = tokio::task::block_in_place(|| {
            self.cache.store(id, binary, |tmp| {
                handle.block_on(self.builder.build(repo, reference.raw(), binary, tmp, progress))
            })
        })?;
        info!(target: "forge::build", path = %entry.path.display(), "binary ready");
        Ok(entry.path)
    }

    /// Uncached build placed at the conventional direct path beside the
    /// active pointers.
    async fn build_direct(
        &self,
        repo: &str,
        reference: &BinaryRef,
        binary: &str,
        cache_ref: &str,
        progress: &mpsc::Sender<BuildProgress>,
    ) -> ForgeResult<PathBuf> {
        let dir = self.cache.active_pointer(binary).parent().expect("bin dir").join("builds").join(cache_ref);
        std::fs::create_dir_all(&dir)?;
        let dest = dir.join(binary);
        self.builder.build(repo, reference.raw(), binary, &dest, progress).await?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cf_plugin::GenericCosmosPlugin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Builder that writes a script announcing a fixed version.
    struct ScriptBuilder {
        version: String,
        commit: String,
        builds: AtomicUsize,
    }

    impl ScriptBuilder {
        fn new(version: &str, commit: &str) -> Self {
            Self { version: version.into(), commit: commit.into(), builds: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl BinaryBuilder for ScriptBuilder {
        async fn resolve_commit(&self, _repo: &str, _reference: &str) -> ForgeResult<String> {
            Ok(self.commit.clone())
        }

        async fn build(
            &self,
            _repo: &str,
            _reference: &str,
            _binary: &str,
            dest: &Path,
            progress: &mpsc::Sender<BuildProgress>,
        ) -> ForgeResult<()> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let _ = progress.send(BuildProgress::Building { step: "compile".into() }).await;
            std::fs::write(dest, format!("#!/bin/sh\necho {}\n", self.version))?;
            Ok(())
        }
    }

    fn coordinator(version: &str, commit: &str) -> (tempfile::TempDir, BuildCoordinator<ScriptBuilder>) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(tmp.path().join("cache/binaries"), tmp.path().join("bin"));
        (tmp, BuildCoordinator::new(cache, ScriptBuilder::new(version, commit)))
    }

    fn request(reference: &str) -> BuildRequest {
        BuildRequest {
            network: NetworkSource::Testnet,
            reference: reference.into(),
            to_cache: true,
            activate: true,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_build_of_the_same_tag_hits_the_cache() {
        let (_tmp, coordinator) = coordinator("v1.2.3", "aaaabbbbccccdddd");
        let plugin = GenericCosmosPlugin::demo();
        let (tx, mut rx) = mpsc::channel(64);

        let first = coordinator.obtain(&plugin, &request("v1.2.3"), &tx).await.unwrap();
        assert_eq!(first.cache_ref, "v1.2.3");
        assert_eq!(first.commit, None);
        assert!(first.path.ends_with("testnet/demo/v1.2.3/demod"));

        let second = coordinator.obtain(&plugin, &request("v1.2.3"), &tx).await.unwrap();
        assert_eq!(second.path, first.path);
        assert_eq!(coordinator.builder.builds.load(Ordering::SeqCst), 1);

        // active pointer follows the cached product
        assert_eq!(coordinator.cache.active_target("demod").unwrap(), first.path);

        drop(tx);
        let mut saw_cache_hit = false;
        while let Some(event) = rx.recv().await {
            saw_cache_hit |= matches!(event, BuildProgress::CacheHit { .. });
        }
        assert!(saw_cache_hit);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn custom_refs_dedupe_on_commit_digest() {
        let (_tmp, coordinator) =
            coordinator("0123456789abcdef0123456789abcdef01234567", "0123456789abcdef0123456789abcdef01234567");
        let plugin = GenericCosmosPlugin::demo();
        let (tx, _rx) = mpsc::channel(64);

        let from_branch = coordinator.obtain(&plugin, &request("feature/ports"), &tx).await.unwrap();
        assert_eq!(from_branch.cache_ref, "0123456789ab");

        // a different branch name at the same commit reuses the build
        let from_other = coordinator.obtain(&plugin, &request("main"), &tx).await.unwrap();
        assert_eq!(from_other.path, from_branch.path);
        assert_eq!(coordinator.builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn colliding_cache_entry_is_surfaced_not_substituted() {
        let (_tmp, coordinator) = coordinator("v1.2.3", "ffff0000ffff0000ffff");
        let plugin = GenericCosmosPlugin::demo();
        let (tx, _rx) = mpsc::channel(64);

        // seed the cache with a binary that reports a different identity
        let id = CacheIdentity::new("demo", NetworkSource::Testnet, "v9.9.9");
        coordinator
            .cache
            .store(&id, "demod", |tmp| {
                std::fs::write(tmp, b"#!/bin/sh\necho v1.2.3\n")?;
                Ok(())
            })
            .unwrap();

        let err = coordinator.obtain(&plugin, &request("v9.9.9"), &tx).await.unwrap_err();
        assert_matches!(err, ForgeError::Corruption { .. });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_build_leaves_the_cache_empty() {
        struct FailingBuilder;

        #[async_trait]
        impl BinaryBuilder for FailingBuilder {
            async fn resolve_commit(&self, _: &str, _: &str) -> ForgeResult<String> {
                Ok("feedfacefeedface".into())
            }
            async fn build(
                &self,
                _: &str,
                _: &str,
                _: &str,
                _: &Path,
                _: &mpsc::Sender<BuildProgress>,
            ) -> ForgeResult<()> {
                Err(ForgeError::unavailable("build", "compiler exploded"))
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(tmp.path().join("cache/binaries"), tmp.path().join("bin"));
        let coordinator = BuildCoordinator::new(cache, FailingBuilder);
        let plugin = GenericCosmosPlugin::demo();
        let (tx, _rx) = mpsc::channel(64);

        let err = coordinator.obtain(&plugin, &request("v1.0.0"), &tx).await.unwrap_err();
        assert_matches!(err, ForgeError::ExternalUnavailable { .. });
        let id = CacheIdentity::new("demo", NetworkSource::Testnet, "v1.0.0");
        assert!(coordinator.cache.lookup(&id, "demod").is_none());
    }
}
