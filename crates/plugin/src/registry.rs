// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Plugin registry.

use crate::NetworkPlugin;
use cf_types::{ForgeError, ForgeResult};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Registered plugins, keyed by family name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn NetworkPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Family names are unique; a second registration
    /// under the same name is refused.
    pub fn register(&mut self, plugin: Arc<dyn NetworkPlugin>) -> ForgeResult<()> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(ForgeError::precondition(format!(
                "plugin {name} is already registered"
            )));
        }
        debug!(target: "forge::plugin", name, "plugin registered");
        self.plugins.insert(name, plugin);
        Ok(())
    }

    /// Resolve a family name to its plugin.
    pub fn get(&self, family: &str) -> ForgeResult<Arc<dyn NetworkPlugin>> {
        self.plugins.get(family).cloned().ok_or_else(|| {
            ForgeError::unavailable(
                "plugin",
                format!("no plugin registered for family {family}"),
            )
        })
    }

    pub fn families(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenericCosmosPlugin;
    use cf_types::ForgeError;

    #[test]
    fn duplicate_family_names_are_refused() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(GenericCosmosPlugin::demo())).unwrap();
        let err = registry.register(Arc::new(GenericCosmosPlugin::demo())).unwrap_err();
        assert!(matches!(err, ForgeError::PreconditionFailed { .. }));
    }

    #[test]
    fn lookup_by_family() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(GenericCosmosPlugin::demo())).unwrap();
        assert_eq!(registry.get("demo").unwrap().binary_name(), "demod");
        assert!(registry.get("unknown").is_err());
        assert_eq!(registry.families(), vec!["demo"]);
    }
}
