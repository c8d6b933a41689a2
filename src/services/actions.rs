//! Trigger action registry.
//!
//! Triggers name their actions; this table maps those names to
//! engine-provided behaviors. Unknown names are a logged warning at the
//! dispatch site, never a fatal error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::event::{names, BusEvent};
use crate::services::event_bus::EventBus;

pub const RUN_SECURITY_SWEEP: &str = "runSecuritySweep";
pub const RUN_SECURITY_SCAN: &str = "runSecurityScan";
pub const ALERT_AND_DIAGNOSE: &str = "alertAndDiagnose";
pub const FINANCIAL_ALERT: &str = "financialAlert";

/// A named behavior dispatched when a trigger fires.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute against the event that fired the trigger.
    async fn execute(&self, event: &BusEvent) -> anyhow::Result<()>;
}

/// Fixed table of action names to handlers. Tests may replace entries.
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the built-in engine actions.
    pub fn builtin(bus: Arc<EventBus>) -> Self {
        let mut handlers: HashMap<String, Arc<dyn ActionHandler>> = HashMap::new();
        handlers.insert(
            RUN_SECURITY_SWEEP.to_string(),
            Arc::new(HealthCheckAction {
                bus: bus.clone(),
                scope: "security-sweep",
            }),
        );
        handlers.insert(
            RUN_SECURITY_SCAN.to_string(),
            Arc::new(HealthCheckAction {
                bus: bus.clone(),
                scope: "security-scan",
            }),
        );
        handlers.insert(
            ALERT_AND_DIAGNOSE.to_string(),
            Arc::new(DegradedAlertAction {
                bus: bus.clone(),
                concern: "error-rate",
            }),
        );
        handlers.insert(
            FINANCIAL_ALERT.to_string(),
            Arc::new(DegradedAlertAction {
                bus,
                concern: "burn-rate",
            }),
        );
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Register or replace a handler under `name`.
    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.write().await.insert(name.into(), handler);
    }

    /// Dispatch `name` against `event`.
    pub async fn dispatch(&self, name: &str, event: &BusEvent) -> EngineResult<()> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(name).cloned()
        };
        match handler {
            Some(handler) => handler
                .execute(event)
                .await
                .map_err(|e| EngineError::HandlerFailure(format!("action {name}: {e}"))),
            None => Err(EngineError::UnknownAction(name.to_string())),
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Kicks off a scoped health check sweep.
struct HealthCheckAction {
    bus: Arc<EventBus>,
    scope: &'static str,
}

#[async_trait]
impl ActionHandler for HealthCheckAction {
    async fn execute(&self, event: &BusEvent) -> anyhow::Result<()> {
        info!(scope = self.scope, source = %event.name, "Running health check action");
        self.bus
            .emit(
                names::HEALTH_CHECK,
                json!({ "scope": self.scope, "source": event.name, "data": event.data }),
            )
            .await;
        Ok(())
    }
}

/// Raises a degradation alert carrying the triggering sample.
struct DegradedAlertAction {
    bus: Arc<EventBus>,
    concern: &'static str,
}

#[async_trait]
impl ActionHandler for DegradedAlertAction {
    async fn execute(&self, event: &BusEvent) -> anyhow::Result<()> {
        warn!(concern = self.concern, source = %event.name, "Degradation alert raised");
        self.bus
            .emit(
                names::HEALTH_DEGRADED,
                json!({ "concern": self.concern, "source": event.name, "data": event.data }),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAction {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ActionHandler for CountingAction {
        async fn execute(&self, _event: &BusEvent) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_builtin_table_complete() {
        let registry = ActionRegistry::builtin(Arc::new(EventBus::default()));
        for name in [
            RUN_SECURITY_SWEEP,
            RUN_SECURITY_SCAN,
            ALERT_AND_DIAGNOSE,
            FINANCIAL_ALERT,
        ] {
            assert!(registry.contains(name).await, "missing builtin {name}");
        }
    }

    #[tokio::test]
    async fn test_unknown_action_is_named_error() {
        let registry = ActionRegistry::new();
        let event = BusEvent::new("metrics:sample", json!({}));
        assert!(matches!(
            registry.dispatch("doesNotExist", &event).await,
            Err(EngineError::UnknownAction(_))
        ));
    }

    #[tokio::test]
    async fn test_registered_action_dispatched() {
        let registry = ActionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry
            .register("custom", Arc::new(CountingAction { count: count.clone() }))
            .await;

        let event = BusEvent::new("metrics:sample", json!({}));
        registry.dispatch("custom", &event).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_alert_action_emits_degraded_event() {
        let bus = Arc::new(EventBus::default());
        let registry = ActionRegistry::builtin(bus.clone());

        let event = BusEvent::new("metrics:sample", json!({ "errorRate": 0.08 }));
        registry.dispatch(ALERT_AND_DIAGNOSE, &event).await.unwrap();

        let degraded = bus.history(Some(names::HEALTH_DEGRADED)).await;
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].data["concern"], "error-rate");
        assert_eq!(degraded[0].data["data"]["errorRate"], 0.08);
    }
}
