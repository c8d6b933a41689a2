//! Cycle execution: the per-task envelope and timer re-arming.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::cycle::{
    battery, CycleKind, CycleReport, CycleTask, TaskResult, TaskStatus,
};
use crate::domain::models::event::names;
use crate::domain::models::hook::{HookContext, HookKind};
use crate::domain::models::state::RuntimeState;

use super::AutonomyEngine;

/// Options for one cycle run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    /// Run even when the engine is not in the Running state.
    pub force: bool,
}

impl CycleOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

impl AutonomyEngine {
    /// Arm the scheduler timer for `kind`. The timer fires once and the
    /// runner re-arms after the cycle ends.
    pub(crate) fn arm(self: &Arc<Self>, kind: CycleKind) {
        let weak = Arc::downgrade(self);
        self.scheduler.arm(kind, move |kind| async move {
            if let Some(engine) = weak.upgrade() {
                engine.on_timer(kind).await;
            }
        });
    }

    async fn on_timer(self: Arc<Self>, kind: CycleKind) {
        match self.run_cycle(kind, CycleOptions::default()).await {
            // The runner re-armed at cycle end.
            Ok(Some(_)) => {}
            // Paused or stopped mid-flight: keep the schedule alive
            // unless the engine is fully stopped.
            Ok(None) => {
                let state = self.runtime_state().await;
                if matches!(state, RuntimeState::Running | RuntimeState::Paused) {
                    self.arm(kind);
                }
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Scheduled cycle failed");
                self.arm(kind);
            }
        }
    }

    /// Run one cycle of `kind`.
    ///
    /// Returns `None` when the engine is not Running and the run was not
    /// forced. Cycles of the same kind never overlap; different kinds
    /// may.
    #[instrument(skip(self, opts), fields(kind = %kind))]
    pub async fn run_cycle(
        self: &Arc<Self>,
        kind: CycleKind,
        opts: CycleOptions,
    ) -> EngineResult<Option<CycleReport>> {
        let Some(guard) = self.cycle_locks.get(&kind) else {
            return Err(EngineError::Validation(format!(
                "no cycle lock for kind {kind}"
            )));
        };
        let _guard = guard.lock().await;

        let (state, engine_level) = self.runtime_snapshot().await;
        if state != RuntimeState::Running && !opts.force {
            debug!(kind = %kind, state = %state, "Skipping cycle, engine not running");
            return Ok(None);
        }

        let tasks = battery(kind);
        let mut report = CycleReport::begin(kind, self.clock.now());
        info!(kind = %kind, cycle = %report.id, tasks = tasks.len(), "Cycle starting");

        self.bus
            .emit(
                names::CYCLE_START,
                json!({ "kind": kind, "cycleId": report.id, "taskCount": tasks.len() }),
            )
            .await;

        // Before-cycle hooks may cancel the whole run.
        let ctx = HookContext::for_cycle(kind, tasks.clone());
        let ctx = match self.plugins.execute_hooks(HookKind::BeforeCycle, ctx).await {
            Ok(ctx) => ctx,
            Err(e) => {
                // A stop-on-error hook chain aborts the cycle.
                report.errors.push(e.to_string());
                report.finish(self.clock.now());
                self.bus
                    .emit(
                        names::CYCLE_ERROR,
                        json!({ "kind": kind, "cycleId": report.id, "error": e.to_string() }),
                    )
                    .await;
                self.finish_cycle(kind, &report, state).await;
                return Ok(Some(report));
            }
        };
        if ctx.cancelled {
            report.cancel(self.clock.now());
            self.bus
                .emit(
                    names::CYCLE_SKIP,
                    json!({
                        "kind": kind,
                        "cycleId": report.id,
                        "reason": "cancelled by beforeCycle hook",
                    }),
                )
                .await;
            self.finish_cycle(kind, &report, state).await;
            return Ok(Some(report));
        }

        for task in &tasks {
            if !engine_level.allows(task.hdm_level) {
                let now = self.clock.now();
                report.tasks.push(TaskResult {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    start_time: now,
                    end_time: now,
                    status: TaskStatus::Skipped,
                    output: None,
                    error: None,
                    reason: Some("requires higher approval level".to_string()),
                });
                self.bus
                    .emit(
                        names::APPROVAL_REQUIRED,
                        json!({
                            "subject": task.id,
                            "requiredLevel": task.hdm_level,
                            "engineLevel": engine_level,
                        }),
                    )
                    .await;
                continue;
            }

            self.bus
                .emit(names::TASK_START, json!({ "task": task.id, "kind": kind }))
                .await;

            if let Err(e) = self
                .plugins
                .execute_hooks(HookKind::BeforeTask, HookContext::for_task(kind, task.clone()))
                .await
            {
                warn!(task = %task.id, error = %e, "beforeTask hooks aborted");
            }

            let result = self.execute_task(task).await;

            if let Err(e) = self
                .plugins
                .execute_hooks(HookKind::AfterTask, HookContext::for_task(kind, task.clone()))
                .await
            {
                warn!(task = %task.id, error = %e, "afterTask hooks aborted");
            }

            self.bus
                .emit(
                    names::TASK_END,
                    json!({ "task": task.id, "kind": kind, "status": result.status }),
                )
                .await;

            if let Some(error) = result.error.clone() {
                report.errors.push(format!("{}: {error}", task.id));
                self.bus
                    .emit(
                        names::TASK_ERROR,
                        json!({ "task": task.id, "kind": kind, "error": error }),
                    )
                    .await;
                if let Err(e) = self
                    .plugins
                    .execute_hooks(HookKind::OnError, HookContext::for_error(Some(kind), error))
                    .await
                {
                    warn!(task = %task.id, error = %e, "onError hooks aborted");
                }
            }

            report.tasks.push(result);
        }

        if let Err(e) = self
            .plugins
            .execute_hooks(HookKind::AfterCycle, HookContext::for_cycle(kind, tasks))
            .await
        {
            warn!(kind = %kind, error = %e, "afterCycle hooks aborted");
        }

        report.finish(self.clock.now());
        info!(
            kind = %kind,
            cycle = %report.id,
            status = ?report.status,
            errors = report.errors.len(),
            "Cycle finished"
        );

        self.bus
            .emit(
                names::CYCLE_END,
                json!({ "kind": kind, "cycleId": report.id, "status": report.status }),
            )
            .await;
        self.finish_cycle(kind, &report, state).await;
        Ok(Some(report))
    }

    /// Record, persist, and re-arm after a cycle closes.
    async fn finish_cycle(
        self: &Arc<Self>,
        kind: CycleKind,
        report: &CycleReport,
        state_at_start: RuntimeState,
    ) {
        self.record_cycle(report).await;
        if let Err(e) = self.store.write_cycle_report(report).await {
            warn!(cycle = %report.id, error = %e, "Failed to write cycle report");
        }
        self.persist().await;

        if kind != CycleKind::Manual
            && matches!(state_at_start, RuntimeState::Running | RuntimeState::Paused)
        {
            let state_now = self.runtime_state().await;
            if matches!(state_now, RuntimeState::Running | RuntimeState::Paused) {
                self.arm(kind);
            }
        }
    }

    /// Execute one task under its deadline and retry policy.
    async fn execute_task(&self, task: &CycleTask) -> TaskResult {
        let start = self.clock.now();
        let timeout = Duration::from_secs(self.config.task_timeout_secs);

        let outcome = match self.task_handlers.resolve(&task.id).await {
            Some(handler) => {
                self.retry
                    .execute(|| {
                        let handler = handler.clone();
                        let task = task.clone();
                        async move {
                            match tokio::time::timeout(timeout, handler.run(&task)).await {
                                Ok(Ok(output)) => Ok(output),
                                Ok(Err(e)) => Err(EngineError::HandlerFailure(e.to_string())),
                                Err(_) => Err(EngineError::Timeout {
                                    subject: task.id.clone(),
                                    secs: timeout.as_secs(),
                                }),
                            }
                        }
                    })
                    .await
            }
            None => {
                warn!(task = %task.id, "No handler registered for task");
                Ok(json!({ "task": task.id, "handler": "missing" }))
            }
        };

        let end = self.clock.now();
        match outcome {
            Ok(output) => TaskResult {
                id: task.id.clone(),
                name: task.name.clone(),
                start_time: start,
                end_time: end,
                status: TaskStatus::Completed,
                output: Some(output),
                error: None,
                reason: None,
            },
            Err(e) => TaskResult {
                id: task.id.clone(),
                name: task.name.clone(),
                start_time: start,
                end_time: end,
                status: TaskStatus::Error,
                output: None,
                error: Some(e.to_string()),
                reason: None,
            },
        }
    }
}
