// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Per-invocation command context.
//!
//! The entry point builds one of these and threads it through every
//! command; there are no global flag variables anywhere.

use cf_cache::BinaryCache;
use cf_config::{DevnetStore, ForgeDirs};
use cf_plugin::{GenericCosmosPlugin, NetworkPlugin, PluginRegistry};
use cf_types::ForgeResult;
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Everything a command needs: resolved paths, output mode, the
/// cancellation scope and the plugin registry.
pub struct CommandContext {
    pub dirs: ForgeDirs,
    pub json: bool,
    pub family: String,
    pub cancel: CancellationToken,
    registry: PluginRegistry,
}

impl CommandContext {
    pub fn new(
        home: Option<PathBuf>,
        json: bool,
        family: String,
        cancel: CancellationToken,
    ) -> ForgeResult<Self> {
        let dirs = match home {
            Some(home) => ForgeDirs::new(home),
            None => ForgeDirs::default_home(),
        };
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(GenericCosmosPlugin::demo()))?;
        Ok(Self { dirs, json, family, cancel, registry })
    }

    /// The plugin for the invocation's family.
    pub fn plugin(&self) -> ForgeResult<Arc<dyn NetworkPlugin>> {
        self.registry.get(&self.family)
    }

    pub fn store(&self) -> DevnetStore {
        DevnetStore::new(self.dirs.clone())
    }

    pub fn cache(&self) -> BinaryCache {
        BinaryCache::new(self.dirs.cache_binaries_dir(), self.dirs.active_bin_dir())
    }
}
