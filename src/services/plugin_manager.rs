//! Plugin manager: discovery, lifecycle, and prioritized hook dispatch.
//!
//! Each plugin lives in `<plugins_dir>/<id>/plugin.json`. The manifest's
//! `main` reference resolves through the registrar table instead of a
//! dynamic module load; manifest hook references are checked against the
//! instance's exports at load time. Hook dispatch snapshots the slot,
//! runs handlers in descending priority (insertion order on ties), and
//! isolates handler failures.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::event::names;
use crate::domain::models::hook::{HookContext, HookKind};
use crate::domain::models::plugin::{is_valid_id, Plugin, PluginManifest, PluginState};
use crate::domain::ports::plugin::PluginRegistrar;
use crate::services::event_bus::EventBus;

const MANIFEST_FILE: &str = "plugin.json";

/// One registered hook handler.
#[derive(Debug, Clone)]
struct HookEntry {
    plugin_id: String,
    handler_ref: String,
    priority: i64,
    seq: u64,
}

/// Serializable inspection view of a managed plugin.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Manages plugin records and the hook dispatch table.
pub struct PluginManager {
    plugins_dir: PathBuf,
    bus: Arc<EventBus>,
    registrar: Arc<PluginRegistrar>,
    plugins: RwLock<HashMap<String, Plugin>>,
    hooks: RwLock<HashMap<HookKind, Vec<HookEntry>>>,
    hook_seq: AtomicU64,
}

impl PluginManager {
    pub fn new(plugins_dir: PathBuf, bus: Arc<EventBus>, registrar: Arc<PluginRegistrar>) -> Self {
        Self {
            plugins_dir,
            bus,
            registrar,
            plugins: RwLock::new(HashMap::new()),
            hooks: RwLock::new(HashMap::new()),
            hook_seq: AtomicU64::new(0),
        }
    }

    /// Enumerate plugin directories and return the valid manifests.
    ///
    /// Invalid manifests are logged and skipped; a missing plugins
    /// directory yields an empty set.
    #[instrument(skip(self))]
    pub async fn discover(&self) -> EngineResult<Vec<PluginManifest>> {
        let mut manifests = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.plugins_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.plugins_dir.display(), "No plugins directory");
                return Ok(manifests);
            }
            Err(e) => {
                return Err(EngineError::filesystem(
                    self.plugins_dir.display().to_string(),
                    e,
                ))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::filesystem(self.plugins_dir.display().to_string(), e))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();

            match self.read_manifest(&dir_name).await {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => {
                    warn!(plugin = %dir_name, error = %e, "Skipping invalid plugin manifest");
                }
            }
        }

        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        info!(count = manifests.len(), "Discovered plugins");
        Ok(manifests)
    }

    /// Discover, load, and enable everything under the plugins
    /// directory. Loading happens dependencies-first; individual
    /// failures are logged and do not abort the sweep.
    pub async fn initialize(&self) -> EngineResult<()> {
        let manifests = self.discover().await?;
        let graph: HashMap<String, Vec<String>> = manifests
            .iter()
            .map(|m| (m.id.clone(), m.dependencies.clone()))
            .collect();

        let mut ordered: Vec<String> = Vec::new();
        for manifest in &manifests {
            match enable_order(&graph, &manifest.id) {
                Ok(chain) => {
                    for id in chain {
                        if !ordered.contains(&id) {
                            ordered.push(id);
                        }
                    }
                }
                Err(e) => {
                    warn!(plugin = %manifest.id, error = %e, "Skipping plugin with unresolvable dependencies");
                }
            }
        }

        for id in &ordered {
            if let Err(e) = self.load(id).await {
                warn!(plugin = %id, error = %e, "Failed to load plugin");
            }
        }
        for id in &ordered {
            if self.state_of(id).await == Some(PluginState::Loaded) {
                if let Err(e) = self.enable(id).await {
                    warn!(plugin = %id, error = %e, "Failed to enable plugin");
                }
            }
        }
        Ok(())
    }

    async fn read_manifest(&self, id: &str) -> EngineResult<PluginManifest> {
        let path = self.plugins_dir.join(id).join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::filesystem(path.display().to_string(), e))?;
        let manifest: PluginManifest = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Validation(format!("malformed manifest for {id}: {e}")))?;
        manifest.validate()?;
        if manifest.id != id {
            return Err(EngineError::Validation(format!(
                "manifest id {:?} does not match directory name {id:?}",
                manifest.id
            )));
        }
        Ok(manifest)
    }

    /// Load a plugin: validate its manifest, check dependencies, resolve
    /// its instance, and register its hooks.
    #[instrument(skip(self))]
    pub async fn load(&self, id: &str) -> EngineResult<()> {
        if !is_valid_id(id) {
            return Err(EngineError::Validation(format!(
                "invalid plugin id {id:?}"
            )));
        }
        if self.plugins.read().await.contains_key(id) {
            return Err(EngineError::Validation(format!(
                "plugin {id} is already loaded"
            )));
        }

        let manifest = self.read_manifest(id).await?;
        let base_path = self.plugins_dir.join(id);
        let mut plugin = Plugin::new(manifest, base_path);

        if let Err(e) = self.prepare(&mut plugin).await {
            plugin.state = PluginState::Error;
            plugin.last_error = Some(e.to_string());
            self.plugins
                .write()
                .await
                .insert(plugin.manifest.id.clone(), plugin);
            return Err(e);
        }

        plugin.state = PluginState::Loaded;
        plugin.loaded_at = Some(Utc::now());

        let payload = json!({
            "id": plugin.manifest.id,
            "name": plugin.manifest.name,
            "version": plugin.manifest.version,
        });
        self.plugins
            .write()
            .await
            .insert(plugin.manifest.id.clone(), plugin);

        self.bus.emit(names::PLUGIN_LOAD, payload).await;
        info!(plugin = %id, "Plugin loaded");
        Ok(())
    }

    /// Dependency check, instance resolution, export verification, and
    /// hook registration.
    async fn prepare(&self, plugin: &mut Plugin) -> EngineResult<()> {
        let id = plugin.manifest.id.clone();

        {
            let plugins = self.plugins.read().await;
            for dep in &plugin.manifest.dependencies {
                let ok = plugins
                    .get(dep)
                    .map(|p| matches!(p.state, PluginState::Loaded | PluginState::Enabled))
                    .unwrap_or(false);
                if !ok {
                    return Err(EngineError::MissingDependency {
                        plugin: id,
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if plugin.manifest.main.is_some() {
            let instance = self.registrar.resolve(&id).ok_or_else(|| {
                EngineError::PluginLoad {
                    plugin: id.clone(),
                    reason: format!(
                        "no registered module for main {:?}",
                        plugin.manifest.main.as_deref().unwrap_or_default()
                    ),
                }
            })?;

            // Reject unknown handler references at load time, not dispatch.
            let exports = instance.exports();
            for (hook_name, handler_ref) in &plugin.manifest.hooks {
                if HookKind::parse(hook_name).is_none() {
                    warn!(plugin = %id, hook = %hook_name, "Ignoring unknown hook name");
                    continue;
                }
                if !exports.contains(&handler_ref.as_str()) {
                    return Err(EngineError::PluginLoad {
                        plugin: id,
                        reason: format!("hook {hook_name} references unknown handler {handler_ref:?}"),
                    });
                }
            }

            plugin.instance = Some(instance);
        }

        self.register_hooks(plugin).await;
        Ok(())
    }

    async fn register_hooks(&self, plugin: &Plugin) {
        let mut hooks = self.hooks.write().await;
        for (hook_name, handler_ref) in &plugin.manifest.hooks {
            let Some(kind) = HookKind::parse(hook_name) else {
                continue;
            };
            let priority = plugin
                .manifest
                .hooks_priority
                .get(hook_name)
                .copied()
                .unwrap_or(0);
            let slot = hooks.entry(kind).or_default();
            slot.push(HookEntry {
                plugin_id: plugin.manifest.id.clone(),
                handler_ref: handler_ref.clone(),
                priority,
                seq: self.hook_seq.fetch_add(1, Ordering::SeqCst),
            });
            slot.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        }
    }

    /// Enable a plugin and, transitively, its dependencies.
    #[instrument(skip(self))]
    pub async fn enable(&self, id: &str) -> EngineResult<()> {
        let order = {
            let plugins = self.plugins.read().await;
            if !plugins.contains_key(id) {
                return Err(EngineError::PluginNotFound(id.to_string()));
            }
            let graph: HashMap<String, Vec<String>> = plugins
                .iter()
                .map(|(pid, p)| (pid.clone(), p.manifest.dependencies.clone()))
                .collect();
            enable_order(&graph, id)?
        };

        for pid in order {
            self.enable_single(&pid).await?;
        }
        Ok(())
    }

    async fn enable_single(&self, id: &str) -> EngineResult<()> {
        let (state, instance, config) = {
            let plugins = self.plugins.read().await;
            let plugin = plugins
                .get(id)
                .ok_or_else(|| EngineError::PluginNotFound(id.to_string()))?;
            (
                plugin.state,
                plugin.instance.clone(),
                plugin.manifest.config.clone(),
            )
        };

        match state {
            PluginState::Enabled => return Ok(()),
            PluginState::Loaded | PluginState::Disabled => {}
            other => {
                return Err(EngineError::InvalidState {
                    from: other.to_string(),
                    to: "enabled".to_string(),
                })
            }
        }

        if let Some(instance) = instance {
            if let Err(e) = instance.on_enable(config.as_ref()).await {
                let mut plugins = self.plugins.write().await;
                if let Some(plugin) = plugins.get_mut(id) {
                    plugin.state = PluginState::Error;
                    plugin.last_error = Some(e.to_string());
                }
                return Err(EngineError::PluginLoad {
                    plugin: id.to_string(),
                    reason: format!("onEnable failed: {e}"),
                });
            }
        }

        if let Some(plugin) = self.plugins.write().await.get_mut(id) {
            plugin.state = PluginState::Enabled;
        }
        self.bus.emit(names::PLUGIN_ENABLE, json!({ "id": id })).await;
        info!(plugin = %id, "Plugin enabled");
        Ok(())
    }

    /// Disable a plugin. Rejected while an enabled plugin still depends
    /// on it, so the dependency invariant holds.
    #[instrument(skip(self))]
    pub async fn disable(&self, id: &str) -> EngineResult<()> {
        let instance = {
            let plugins = self.plugins.read().await;
            let plugin = plugins
                .get(id)
                .ok_or_else(|| EngineError::PluginNotFound(id.to_string()))?;
            match plugin.state {
                PluginState::Disabled => return Ok(()),
                PluginState::Enabled => {}
                other => {
                    return Err(EngineError::InvalidState {
                        from: other.to_string(),
                        to: "disabled".to_string(),
                    })
                }
            }
            if let Some(dependent) = plugins.values().find(|p| {
                p.state == PluginState::Enabled && p.manifest.dependencies.contains(&id.to_string())
            }) {
                return Err(EngineError::DependencyInUse {
                    plugin: id.to_string(),
                    dependent: dependent.manifest.id.clone(),
                });
            }
            plugin.instance.clone()
        };

        if let Some(instance) = instance {
            if let Err(e) = instance.on_disable().await {
                warn!(plugin = %id, error = %e, "onDisable failed");
            }
        }

        if let Some(plugin) = self.plugins.write().await.get_mut(id) {
            plugin.state = PluginState::Disabled;
        }
        self.bus.emit(names::PLUGIN_DISABLE, json!({ "id": id })).await;
        info!(plugin = %id, "Plugin disabled");
        Ok(())
    }

    /// Unload a plugin. Rejected while any loaded plugin lists it as a
    /// dependency.
    #[instrument(skip(self))]
    pub async fn unload(&self, id: &str) -> EngineResult<()> {
        let instance = {
            let plugins = self.plugins.read().await;
            let plugin = plugins
                .get(id)
                .ok_or_else(|| EngineError::PluginNotFound(id.to_string()))?;
            if let Some(dependent) = plugins
                .values()
                .find(|p| p.manifest.id != id && p.manifest.dependencies.contains(&id.to_string()))
            {
                return Err(EngineError::DependencyInUse {
                    plugin: id.to_string(),
                    dependent: dependent.manifest.id.clone(),
                });
            }
            plugin.instance.clone()
        };

        if let Some(instance) = instance {
            if let Err(e) = instance.on_unload().await {
                warn!(plugin = %id, error = %e, "onUnload failed");
            }
        }

        {
            let mut hooks = self.hooks.write().await;
            for slot in hooks.values_mut() {
                slot.retain(|entry| entry.plugin_id != id);
            }
        }
        self.plugins.write().await.remove(id);

        self.bus.emit(names::PLUGIN_UNLOAD, json!({ "id": id })).await;
        info!(plugin = %id, "Plugin unloaded");
        Ok(())
    }

    /// Run every registered handler for a hook kind against `ctx`.
    ///
    /// The slot is snapshotted up front to tolerate concurrent
    /// registration changes. Returned maps are shallow-merged into the
    /// context; a failing handler emits `plugin:error` and dispatch
    /// continues unless the context has `stopOnError` set.
    pub async fn execute_hooks(
        &self,
        kind: HookKind,
        mut ctx: HookContext,
    ) -> EngineResult<HookContext> {
        if let Some(event_name) = hook_event_name(kind) {
            self.bus
                .emit(event_name, json!({ "hook": kind.as_str() }))
                .await;
        }

        let entries: Vec<HookEntry> = {
            let hooks = self.hooks.read().await;
            hooks.get(&kind).cloned().unwrap_or_default()
        };

        for entry in entries {
            let instance = {
                let plugins = self.plugins.read().await;
                match plugins.get(&entry.plugin_id) {
                    Some(p) if p.state == PluginState::Enabled => p.instance.clone(),
                    _ => None,
                }
            };
            let Some(instance) = instance else {
                continue;
            };

            match instance.invoke(&entry.handler_ref, &ctx).await {
                Ok(Some(contribution)) => ctx.merge(contribution),
                Ok(None) => {}
                Err(e) => {
                    self.bus
                        .emit(
                            names::PLUGIN_ERROR,
                            json!({
                                "pluginId": entry.plugin_id,
                                "hookName": kind.as_str(),
                                "error": e.to_string(),
                            }),
                        )
                        .await;
                    if ctx.stop_on_error {
                        return Err(EngineError::PluginHook {
                            plugin: entry.plugin_id,
                            hook: kind.as_str().to_string(),
                            reason: e.to_string(),
                        });
                    }
                    warn!(
                        plugin = %entry.plugin_id,
                        hook = %kind,
                        error = %e,
                        "Hook handler failed, continuing"
                    );
                }
            }
        }

        Ok(ctx)
    }

    pub async fn state_of(&self, id: &str) -> Option<PluginState> {
        self.plugins.read().await.get(id).map(|p| p.state)
    }

    /// Inspection snapshot of every managed plugin, ordered by id.
    pub async fn statuses(&self) -> Vec<PluginStatus> {
        let plugins = self.plugins.read().await;
        let mut statuses: Vec<PluginStatus> = plugins
            .values()
            .map(|p| PluginStatus {
                id: p.manifest.id.clone(),
                name: p.manifest.name.clone(),
                version: p.manifest.version.clone(),
                state: p.state,
                dependencies: p.manifest.dependencies.clone(),
                last_error: p.last_error.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub async fn enabled_count(&self) -> usize {
        self.plugins
            .read()
            .await
            .values()
            .filter(|p| p.state == PluginState::Enabled)
            .count()
    }
}

fn hook_event_name(kind: HookKind) -> Option<&'static str> {
    match kind {
        HookKind::BeforeCycle => Some(names::PLUGIN_HOOK_BEFORE_CYCLE),
        HookKind::AfterCycle => Some(names::PLUGIN_HOOK_AFTER_CYCLE),
        HookKind::BeforeTask => Some(names::PLUGIN_HOOK_BEFORE_TASK),
        HookKind::AfterTask => Some(names::PLUGIN_HOOK_AFTER_TASK),
        HookKind::OnTrigger | HookKind::OnError => None,
    }
}

/// Dependencies-first enable order for `root`, with cycle detection.
fn enable_order(
    graph: &HashMap<String, Vec<String>>,
    root: &str,
) -> EngineResult<Vec<String>> {
    #[derive(PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        graph: &HashMap<String, Vec<String>>,
        node: &str,
        marks: &mut HashMap<String, Mark>,
        order: &mut Vec<String>,
    ) -> EngineResult<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(EngineError::Validation(format!(
                    "dependency cycle involving plugin {node}"
                )))
            }
            None => {}
        }
        marks.insert(node.to_string(), Mark::Visiting);

        let deps = graph.get(node).cloned().unwrap_or_default();
        for dep in deps {
            if !graph.contains_key(&dep) {
                return Err(EngineError::MissingDependency {
                    plugin: node.to_string(),
                    dependency: dep,
                });
            }
            visit(graph, &dep, marks, order)?;
        }

        marks.insert(node.to_string(), Mark::Done);
        order.push(node.to_string());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::new();
    visit(graph, root, &mut marks, &mut order)?;
    Ok(order)
}
