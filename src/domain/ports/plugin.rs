//! Plugin instance port and registrar table.
//!
//! Plugins ship a `plugin.json` manifest; the executable side of a
//! plugin is a compiled object implementing [`PluginInstance`],
//! registered at startup under the plugin id. Manifest hook references
//! are resolved against the instance's export list at load time, never
//! at dispatch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::models::hook::HookContext;

/// Executable side of a plugin.
///
/// Lifecycle callbacks default to no-ops; `invoke` routes a manifest
/// handler reference to the matching behavior. Handlers treat the
/// context as a value and communicate only through the returned map.
#[async_trait]
pub trait PluginInstance: Send + Sync {
    /// Handler references this instance exports. Manifest hook entries
    /// naming anything else are rejected at load time.
    fn exports(&self) -> Vec<&'static str>;

    async fn on_enable(&self, _config: Option<&Value>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_disable(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_unload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoke an exported handler. A returned map is shallow-merged into
    /// the dispatch context.
    async fn invoke(
        &self,
        handler: &str,
        ctx: &HookContext,
    ) -> anyhow::Result<Option<Map<String, Value>>>;
}

type PluginFactory = Arc<dyn Fn() -> Arc<dyn PluginInstance> + Send + Sync>;

/// Start-time table mapping plugin ids to instance factories.
///
/// Stands in for dynamic module loading: discovery still reads
/// manifests from disk, but `main` resolves to a factory registered
/// here instead of a loaded module.
#[derive(Default)]
pub struct PluginRegistrar {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl PluginRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `plugin_id`, replacing any previous one.
    pub fn register<F>(&self, plugin_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn PluginInstance> + Send + Sync + 'static,
    {
        if let Ok(mut factories) = self.factories.write() {
            factories.insert(plugin_id.into(), Arc::new(factory));
        }
    }

    /// Build a fresh instance for `plugin_id`, if registered.
    pub fn resolve(&self, plugin_id: &str) -> Option<Arc<dyn PluginInstance>> {
        self.factories
            .read()
            .ok()
            .and_then(|factories| factories.get(plugin_id).cloned())
            .map(|factory| factory())
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factories
            .read()
            .map(|factories| factories.contains_key(plugin_id))
            .unwrap_or(false)
    }
}
