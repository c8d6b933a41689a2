//! Event processing: trigger evaluation, approval gating, and action
//! dispatch.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::approval::HdmLevel;
use crate::domain::models::event::{names, BusEvent};
use crate::domain::models::hook::{HookContext, HookKind};
use crate::domain::models::state::RuntimeState;
use crate::domain::models::trigger::TriggerConfig;
use crate::services::actions;

use super::AutonomyEngine;

impl AutonomyEngine {
    /// Evaluate every registered trigger against an incoming event.
    ///
    /// Internal errors are caught and logged; event processing never
    /// fails the engine.
    pub async fn process_event(&self, event: &BusEvent) {
        if let Err(e) = self.process_event_inner(event).await {
            warn!(event = %event.name, error = %e, "processEvent failed");
        }
    }

    async fn process_event_inner(&self, event: &BusEvent) -> EngineResult<()> {
        let (state, engine_level) = self.runtime_snapshot().await;
        if state != RuntimeState::Running {
            return Ok(());
        }

        for trigger in self.triggers.matching(event).await {
            if !engine_level.allows(trigger.hdm_level) {
                // Gated out: fire count untouched, approval event instead.
                self.bus
                    .emit(
                        names::APPROVAL_REQUIRED,
                        json!({
                            "subject": trigger.id,
                            "requiredLevel": trigger.hdm_level,
                            "engineLevel": engine_level,
                        }),
                    )
                    .await;
                continue;
            }

            let now = self.clock.now();
            if !trigger.cooldown_ready(now) {
                debug!(trigger = %trigger.id, "Trigger in cooldown, skipping");
                continue;
            }

            let projection = match self.triggers.mark_fired(&trigger.id, now).await {
                Ok(projection) => projection,
                Err(e) => {
                    // Unregistered concurrently; nothing to fire.
                    debug!(trigger = %trigger.id, error = %e, "Trigger vanished before firing");
                    continue;
                }
            };

            self.bus
                .emit(names::TRIGGER_FIRE, json!({ "trigger": projection }))
                .await;

            let mut hook_data = Map::new();
            hook_data.insert("trigger".to_string(), json!(projection));
            hook_data.insert("event".to_string(), json!(event));
            if let Err(e) = self
                .plugins
                .execute_hooks(HookKind::OnTrigger, HookContext::for_trigger(hook_data))
                .await
            {
                warn!(trigger = %trigger.id, error = %e, "onTrigger hooks aborted");
            }

            match self.actions.dispatch(&trigger.action, event).await {
                Ok(()) => {}
                Err(EngineError::UnknownAction(name)) => {
                    warn!(trigger = %trigger.id, action = %name, "Unknown trigger action");
                }
                Err(e) => {
                    warn!(trigger = %trigger.id, action = %trigger.action, error = %e, "Trigger action failed");
                    let ctx = HookContext::for_error(None, e.to_string());
                    if let Err(hook_err) =
                        self.plugins.execute_hooks(HookKind::OnError, ctx).await
                    {
                        warn!(trigger = %trigger.id, error = %hook_err, "onError hooks aborted");
                    }
                }
            }
        }

        Ok(())
    }

    /// Register the built-in triggers, skipping ids that already exist
    /// (e.g. restored from a snapshot).
    pub(crate) async fn register_default_triggers(&self) {
        for config in default_triggers() {
            if self.triggers.contains(&config.id).await {
                continue;
            }
            if let Err(e) = self.triggers.register(config).await {
                warn!(error = %e, "Failed to register default trigger");
            }
        }
    }
}

/// Built-in triggers: code-change scans plus metric threshold alerts.
fn default_triggers() -> Vec<TriggerConfig> {
    vec![
        TriggerConfig::event(
            "code-change",
            "Code change scan",
            "code:change:*",
            actions::RUN_SECURITY_SCAN,
            HdmLevel::Routine,
        ),
        TriggerConfig::event(
            "code-push-sweep",
            "Code push sweep",
            "code:push",
            actions::RUN_SECURITY_SWEEP,
            HdmLevel::Routine,
        ),
        TriggerConfig::condition(
            "error-rate-alert",
            "Error rate above threshold",
            |event| {
                Ok(event
                    .data
                    .get("errorRate")
                    .and_then(Value::as_f64)
                    .map(|rate| rate > 0.05)
                    .unwrap_or(false))
            },
            actions::ALERT_AND_DIAGNOSE,
            HdmLevel::Routine,
        ),
        TriggerConfig::condition(
            "burn-rate-alert",
            "Burn rate above threshold",
            |event| {
                Ok(event
                    .data
                    .get("burnRate")
                    .and_then(Value::as_f64)
                    .map(|rate| rate > 1.5)
                    .unwrap_or(false))
            },
            actions::FINANCIAL_ALERT,
            HdmLevel::Supervised,
        ),
    ]
}
