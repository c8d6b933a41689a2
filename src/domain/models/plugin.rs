//! Plugin manifests, validation rules, and lifecycle state.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::plugin::PluginInstance;

const MAX_ID_LEN: usize = 100;

/// Declarative plugin metadata read from `plugin.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Module reference resolved through the registrar table. Must be a
    /// safe relative path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    /// Hook name to handler reference. Deterministic iteration order so
    /// tie-broken dispatch is stable across loads.
    #[serde(default)]
    pub hooks: BTreeMap<String, String>,
    #[serde(default)]
    pub hooks_priority: HashMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl PluginManifest {
    /// Validate identifier, name, version, and `main` path rules.
    pub fn validate(&self) -> EngineResult<()> {
        if !is_valid_id(&self.id) {
            return Err(EngineError::Validation(format!(
                "plugin id {:?} must match [A-Za-z0-9_-]{{1,{MAX_ID_LEN}}}",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "plugin {} has an empty name",
                self.id
            )));
        }
        if self.version.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "plugin {} has an empty version",
                self.id
            )));
        }
        if let Some(main) = &self.main {
            if !is_safe_relative_path(main) {
                return Err(EngineError::Validation(format!(
                    "plugin {} main path {:?} is not a safe relative path",
                    self.id, main
                )));
            }
        }
        if self.main.is_none() && !self.hooks.is_empty() {
            return Err(EngineError::Validation(format!(
                "plugin {} declares hooks but no main module",
                self.id
            )));
        }
        Ok(())
    }
}

/// `[A-Za-z0-9_-]+`, at most 100 characters.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Relative path safety: no absolute paths, no `..` segments, no null
/// bytes, and only characters from `[A-Za-z0-9_\-./]`.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    {
        return false;
    }
    let parsed = Path::new(path);
    if parsed.is_absolute() {
        return false;
    }
    parsed
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Lifecycle state of a managed plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Loaded,
    Enabled,
    Disabled,
    Error,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A managed plugin record. Owned exclusively by the plugin manager; the
/// instance is shared with the hook dispatch loop.
#[derive(Clone)]
pub struct Plugin {
    pub manifest: PluginManifest,
    pub base_path: PathBuf,
    pub state: PluginState,
    pub instance: Option<Arc<dyn PluginInstance>>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Plugin {
    pub fn new(manifest: PluginManifest, base_path: PathBuf) -> Self {
        Self {
            manifest,
            base_path,
            state: PluginState::Unloaded,
            instance: None,
            loaded_at: None,
            last_error: None,
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.manifest.id)
            .field("state", &self.state)
            .field("has_instance", &self.instance.is_some())
            .field("loaded_at", &self.loaded_at)
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str) -> PluginManifest {
        PluginManifest {
            id: id.to_string(),
            name: "Test plugin".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            author: None,
            dependencies: vec![],
            main: None,
            hooks: BTreeMap::new(),
            hooks_priority: HashMap::new(),
            config: None,
        }
    }

    #[test]
    fn test_single_char_id_valid() {
        assert!(is_valid_id("a"));
    }

    #[test]
    fn test_id_length_boundary() {
        assert!(is_valid_id(&"a".repeat(100)));
        assert!(!is_valid_id(&"a".repeat(101)));
        assert!(!is_valid_id(""));
    }

    #[test]
    fn test_id_character_set() {
        assert!(is_valid_id("metrics_exporter-2"));
        assert!(!is_valid_id("metrics exporter"));
        assert!(!is_valid_id("metrics/exporter"));
        assert!(!is_valid_id("metrics;rm"));
    }

    #[test]
    fn test_safe_relative_paths() {
        assert!(is_safe_relative_path("a/b.json"));
        assert!(is_safe_relative_path("handlers/main.rs"));
        assert!(!is_safe_relative_path("../a"));
        assert!(!is_safe_relative_path("/a/b"));
        assert!(!is_safe_relative_path("a\x00b"));
        assert!(!is_safe_relative_path("a|b"));
        assert!(!is_safe_relative_path("a b"));
        assert!(!is_safe_relative_path(""));
    }

    #[test]
    fn test_dotdot_in_middle_rejected() {
        assert!(!is_safe_relative_path("a/../b"));
    }

    #[test]
    fn test_manifest_validation() {
        assert!(manifest("good-plugin").validate().is_ok());

        let mut bad = manifest("bad id");
        assert!(bad.validate().is_err());
        bad = manifest("ok");
        bad.name = "  ".to_string();
        assert!(bad.validate().is_err());

        let mut unsafe_main = manifest("ok");
        unsafe_main.main = Some("../escape.rs".to_string());
        assert!(unsafe_main.validate().is_err());
    }

    #[test]
    fn test_hooks_require_main() {
        let mut m = manifest("hooked");
        m.hooks
            .insert("beforeCycle".to_string(), "on_before_cycle".to_string());
        assert!(m.validate().is_err());
        m.main = Some("handlers.rs".to_string());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_manifest_json_shape() {
        let raw = r#"{
            "id": "reporter",
            "name": "Cycle reporter",
            "version": "0.2.0",
            "dependencies": ["metrics"],
            "main": "reporter.rs",
            "hooks": { "afterCycle": "on_after_cycle" },
            "hooksPriority": { "afterCycle": 10 }
        }"#;
        let parsed: PluginManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.id, "reporter");
        assert_eq!(parsed.dependencies, vec!["metrics".to_string()]);
        assert_eq!(parsed.hooks_priority["afterCycle"], 10);
        parsed.validate().unwrap();
    }
}
