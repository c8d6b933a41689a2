//! Trigger registry: declarative event-driven automation rules.
//!
//! Holds triggers by id, matches them against bus events, and stamps
//! fire state. Approval gating happens in the engine before a trigger
//! is allowed to fire.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::event::{names, BusEvent};
use crate::domain::models::trigger::{
    Trigger, TriggerConfig, TriggerMatch, TriggerProjection,
};
use crate::services::event_bus::{pattern_matches, EventBus};

/// Registry of triggers evaluated on every incoming event.
pub struct TriggerRegistry {
    bus: Arc<EventBus>,
    triggers: RwLock<Vec<Trigger>>,
}

impl TriggerRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            triggers: RwLock::new(Vec::new()),
        }
    }

    /// Register a trigger. Duplicate ids are rejected.
    pub async fn register(&self, config: TriggerConfig) -> EngineResult<TriggerProjection> {
        if config.id.trim().is_empty() {
            return Err(EngineError::Validation(
                "trigger id cannot be empty".to_string(),
            ));
        }

        let trigger = config.into_trigger();
        let projection = {
            let mut triggers = self.triggers.write().await;
            if triggers.iter().any(|t| t.id == trigger.id) {
                return Err(EngineError::Validation(format!(
                    "trigger {} is already registered",
                    trigger.id
                )));
            }
            let projection = trigger.projection();
            triggers.push(trigger);
            projection
        };

        self.bus
            .emit(names::TRIGGER_REGISTER, json!({ "trigger": projection }))
            .await;
        Ok(projection)
    }

    /// Remove a trigger by id.
    pub async fn unregister(&self, id: &str) -> EngineResult<()> {
        let removed = {
            let mut triggers = self.triggers.write().await;
            let before = triggers.len();
            triggers.retain(|t| t.id != id);
            triggers.len() != before
        };
        if !removed {
            return Err(EngineError::TriggerNotFound(id.to_string()));
        }

        self.bus
            .emit(names::TRIGGER_UNREGISTER, json!({ "id": id }))
            .await;
        Ok(())
    }

    /// Snapshot of all triggers.
    pub async fn all(&self) -> Vec<Trigger> {
        self.triggers.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Trigger> {
        self.triggers.read().await.iter().find(|t| t.id == id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.triggers.read().await.iter().any(|t| t.id == id)
    }

    /// Enable or disable a trigger.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> EngineResult<()> {
        let mut triggers = self.triggers.write().await;
        match triggers.iter_mut().find(|t| t.id == id) {
            Some(trigger) => {
                trigger.enabled = enabled;
                Ok(())
            }
            None => Err(EngineError::TriggerNotFound(id.to_string())),
        }
    }

    /// Consistent snapshot of enabled triggers matching `event`.
    ///
    /// An erroring condition predicate is treated as a non-match.
    pub async fn matching(&self, event: &BusEvent) -> Vec<Trigger> {
        let triggers = self.triggers.read().await;
        triggers
            .iter()
            .filter(|t| t.enabled && Self::trigger_matches(t, event))
            .cloned()
            .collect()
    }

    fn trigger_matches(trigger: &Trigger, event: &BusEvent) -> bool {
        match &trigger.matcher {
            TriggerMatch::Pattern(pattern) => pattern_matches(&event.name, pattern),
            TriggerMatch::Predicate(predicate) => match predicate(event) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(
                        trigger = %trigger.id,
                        event = %event.name,
                        error = %e,
                        "Trigger predicate failed, treating as non-match"
                    );
                    false
                }
            },
        }
    }

    /// Stamp fire state for a trigger and return its updated projection.
    pub async fn mark_fired(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<TriggerProjection> {
        let mut triggers = self.triggers.write().await;
        match triggers.iter_mut().find(|t| t.id == id) {
            Some(trigger) => {
                trigger.last_fired = Some(now);
                trigger.fire_count += 1;
                debug!(trigger = %trigger.id, fire_count = trigger.fire_count, "Trigger fired");
                Ok(trigger.projection())
            }
            None => Err(EngineError::TriggerNotFound(id.to_string())),
        }
    }

    /// Restore persisted fire state onto an already registered trigger.
    ///
    /// Used on initialize so snapshot projections survive a restart.
    pub async fn restore(&self, projection: &TriggerProjection) {
        let mut triggers = self.triggers.write().await;
        if let Some(trigger) = triggers.iter_mut().find(|t| t.id == projection.id) {
            trigger.fire_count = projection.fire_count;
            trigger.last_fired = projection.last_fired;
            trigger.enabled = projection.enabled;
        }
    }

    /// Projections of all triggers, for state snapshots.
    pub async fn projections(&self) -> Vec<TriggerProjection> {
        self.triggers.read().await.iter().map(Trigger::projection).collect()
    }
}
