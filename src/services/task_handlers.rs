//! Task handler registry.
//!
//! The cycle runner resolves handlers by task id from this table. The
//! built-in registry ships a placeholder handler for every battery task;
//! deployments and tests install their own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::models::cycle::{battery, CycleKind, CycleTask};
use crate::domain::ports::task_handler::TaskHandler;

/// Maps task ids to their handlers.
pub struct TaskHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with a placeholder handler for every battery task.
    pub fn builtin() -> Self {
        let mut handlers: HashMap<String, Arc<dyn TaskHandler>> = HashMap::new();
        for kind in [CycleKind::Daily, CycleKind::Weekly, CycleKind::Monthly] {
            for task in battery(kind) {
                handlers
                    .entry(task.id.clone())
                    .or_insert_with(|| Arc::new(PlaceholderHandler));
            }
        }
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Register or replace the handler for a task id.
    pub async fn register(&self, task_id: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().await.insert(task_id.into(), handler);
    }

    pub async fn resolve(&self, task_id: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(task_id).cloned()
    }
}

impl Default for TaskHandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Stand-in handler until a concrete task body is installed.
struct PlaceholderHandler;

#[async_trait]
impl TaskHandler for PlaceholderHandler {
    async fn run(&self, task: &CycleTask) -> anyhow::Result<serde_json::Value> {
        info!(task = %task.id, "No handler installed, recording placeholder result");
        Ok(json!({ "task": task.id, "placeholder": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_covers_every_battery_task() {
        let registry = TaskHandlerRegistry::builtin();
        for kind in [CycleKind::Daily, CycleKind::Weekly, CycleKind::Monthly] {
            for task in battery(kind) {
                assert!(
                    registry.resolve(&task.id).await.is_some(),
                    "missing handler for {}",
                    task.id
                );
            }
        }
    }

    #[tokio::test]
    async fn test_custom_handler_replaces_placeholder() {
        struct FixedHandler;

        #[async_trait]
        impl TaskHandler for FixedHandler {
            async fn run(&self, _task: &CycleTask) -> anyhow::Result<serde_json::Value> {
                Ok(json!({ "fixed": true }))
            }
        }

        let registry = TaskHandlerRegistry::builtin();
        registry
            .register("security-sweep", Arc::new(FixedHandler))
            .await;

        let handler = registry.resolve("security-sweep").await.unwrap();
        let task = battery(CycleKind::Daily).remove(0);
        let output = handler.run(&task).await.unwrap();
        assert_eq!(output["fixed"], true);
    }
}
