//! Bus events and the stable event name space.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event flowing through the bus. Immutable once emitted; subscribers
/// observe a value copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Colon-delimited segment name, e.g. `autonomy:cycle:start`.
    pub name: String,
    /// Opaque payload.
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Stable event identifiers emitted by the engine and its components.
///
/// Consumers may subscribe to any prefix with `*`.
pub mod names {
    pub const ENGINE_START: &str = "autonomy:engine:start";
    pub const ENGINE_STOP: &str = "autonomy:engine:stop";
    pub const ENGINE_PAUSE: &str = "autonomy:engine:pause";
    pub const ENGINE_RESUME: &str = "autonomy:engine:resume";

    pub const CYCLE_START: &str = "autonomy:cycle:start";
    pub const CYCLE_END: &str = "autonomy:cycle:end";
    pub const CYCLE_ERROR: &str = "autonomy:cycle:error";
    pub const CYCLE_SKIP: &str = "autonomy:cycle:skip";

    pub const TASK_START: &str = "autonomy:task:start";
    pub const TASK_END: &str = "autonomy:task:end";
    pub const TASK_ERROR: &str = "autonomy:task:error";

    pub const TRIGGER_FIRE: &str = "autonomy:trigger:fire";
    pub const TRIGGER_REGISTER: &str = "autonomy:trigger:register";
    pub const TRIGGER_UNREGISTER: &str = "autonomy:trigger:unregister";

    pub const APPROVAL_REQUIRED: &str = "autonomy:approval:required";
    pub const APPROVAL_GRANTED: &str = "autonomy:approval:granted";
    pub const APPROVAL_DENIED: &str = "autonomy:approval:denied";

    pub const HEALTH_CHECK: &str = "autonomy:health:check";
    pub const HEALTH_DEGRADED: &str = "autonomy:health:degraded";
    pub const HEALTH_RECOVERED: &str = "autonomy:health:recovered";

    pub const PLUGIN_LOAD: &str = "plugin:load";
    pub const PLUGIN_UNLOAD: &str = "plugin:unload";
    pub const PLUGIN_ERROR: &str = "plugin:error";
    pub const PLUGIN_ENABLE: &str = "plugin:enable";
    pub const PLUGIN_DISABLE: &str = "plugin:disable";

    pub const PLUGIN_HOOK_BEFORE_CYCLE: &str = "plugin:hook:before:cycle";
    pub const PLUGIN_HOOK_AFTER_CYCLE: &str = "plugin:hook:after:cycle";
    pub const PLUGIN_HOOK_BEFORE_TASK: &str = "plugin:hook:before:task";
    pub const PLUGIN_HOOK_AFTER_TASK: &str = "plugin:hook:after:task";
}
