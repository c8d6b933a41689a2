//! Task handler port.
//!
//! Concrete task bodies (security sweep, compliance scan, ...) live
//! behind this uniform interface; the cycle runner only sees opaque
//! handlers resolved by task id.

use async_trait::async_trait;

use crate::domain::models::cycle::CycleTask;

/// One unit of cycle work.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task, returning an opaque output payload captured in
    /// the task result.
    async fn run(&self, task: &CycleTask) -> anyhow::Result<serde_json::Value>;
}
