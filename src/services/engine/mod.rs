//! Autonomy engine: the composition root.
//!
//! Composes the event bus, plugin manager, trigger registry, scheduler,
//! and state store into one lifecycle. A single `*` bus subscription
//! feeds `process_event` while the engine runs; scheduled cycles fire
//! through the per-kind timers and re-arm after each run.

mod cycles;
mod events;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::approval::HdmLevel;
use crate::domain::models::config::EngineConfig;
use crate::domain::models::cycle::{CycleKind, CycleReport, CycleStatus};
use crate::domain::models::event::names;
use crate::domain::models::state::{EngineState, LastCycleRun, RuntimeState};
use crate::domain::models::trigger::{TriggerConfig, TriggerProjection};
use crate::domain::ports::clock::{Clock, SystemClock};
use crate::domain::ports::plugin::PluginRegistrar;
use crate::infrastructure::persistence::StateStore;
use crate::services::actions::ActionRegistry;
use crate::services::event_bus::{EventBus, EventBusConfig, SubscriptionId};
use crate::services::plugin_manager::PluginManager;
use crate::services::retry::RetryPolicy;
use crate::services::scheduler::CycleScheduler;
use crate::services::task_handlers::TaskHandlerRegistry;
use crate::services::trigger_registry::TriggerRegistry;

pub use cycles::CycleOptions;

/// Mutable runtime state behind one lock.
struct Runtime {
    state: RuntimeState,
    hdm_level: HdmLevel,
    last_cycle_run: LastCycleRun,
    cycle_history: Vec<CycleReport>,
}

/// Filter for `get_logs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogQuery {
    pub kind: Option<CycleKind>,
    pub status: Option<CycleStatus>,
    pub limit: Option<usize>,
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: RuntimeState,
    pub hdm_level: HdmLevel,
    pub last_cycle_run: LastCycleRun,
    pub trigger_count: usize,
    pub enabled_plugins: usize,
    pub cycles_recorded: usize,
}

/// The autonomous operations engine.
pub struct AutonomyEngine {
    pub(crate) config: EngineConfig,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) plugins: Arc<PluginManager>,
    pub(crate) triggers: Arc<TriggerRegistry>,
    pub(crate) scheduler: CycleScheduler,
    pub(crate) store: Arc<StateStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) actions: ActionRegistry,
    pub(crate) task_handlers: Arc<TaskHandlerRegistry>,
    pub(crate) retry: RetryPolicy,
    registrar: Arc<PluginRegistrar>,
    runtime: RwLock<Runtime>,
    bus_subscription: Mutex<Option<SubscriptionId>>,
    /// Per-kind guards so cycles of the same kind never overlap.
    pub(crate) cycle_locks: HashMap<CycleKind, Mutex<()>>,
}

/// Builder for an engine with injectable collaborators.
pub struct EngineBuilder {
    config: EngineConfig,
    bus: Option<Arc<EventBus>>,
    clock: Option<Arc<dyn Clock>>,
    registrar: Option<Arc<PluginRegistrar>>,
    task_handlers: Option<Arc<TaskHandlerRegistry>>,
}

impl EngineBuilder {
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_registrar(mut self, registrar: Arc<PluginRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn with_task_handlers(mut self, handlers: Arc<TaskHandlerRegistry>) -> Self {
        self.task_handlers = Some(handlers);
        self
    }

    pub fn build(self) -> Arc<AutonomyEngine> {
        let config = self.config;
        let bus = self.bus.unwrap_or_else(|| {
            Arc::new(EventBus::new(EventBusConfig {
                max_history: config.max_event_history,
            }))
        });
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let registrar = self
            .registrar
            .unwrap_or_else(|| Arc::new(PluginRegistrar::new()));
        let task_handlers = self
            .task_handlers
            .unwrap_or_else(|| Arc::new(TaskHandlerRegistry::builtin()));

        let plugins = Arc::new(PluginManager::new(
            config.root_dir.join("plugins"),
            bus.clone(),
            registrar.clone(),
        ));
        let triggers = Arc::new(TriggerRegistry::new(bus.clone()));
        let scheduler = CycleScheduler::new(clock.clone(), config.schedules);
        let store = Arc::new(StateStore::new(&config.root_dir));
        let actions = ActionRegistry::builtin(bus.clone());
        let retry = RetryPolicy::from_config(config.retry);

        let cycle_locks = [
            CycleKind::Daily,
            CycleKind::Weekly,
            CycleKind::Monthly,
            CycleKind::Manual,
        ]
        .into_iter()
        .map(|kind| (kind, Mutex::new(())))
        .collect();

        let hdm_level = config.hdm_level;
        Arc::new(AutonomyEngine {
            config,
            bus,
            plugins,
            triggers,
            scheduler,
            store,
            clock,
            actions,
            task_handlers,
            retry,
            registrar,
            runtime: RwLock::new(Runtime {
                state: RuntimeState::Stopped,
                hdm_level,
                last_cycle_run: LastCycleRun::default(),
                cycle_history: Vec::new(),
            }),
            bus_subscription: Mutex::new(None),
            cycle_locks,
        })
    }
}

impl AutonomyEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            bus: None,
            clock: None,
            registrar: None,
            task_handlers: None,
        }
    }

    /// Engine with default collaborators.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    /// Ensure directories, restore the persisted snapshot, register
    /// default triggers, and initialize the plugin manager.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> EngineResult<()> {
        self.store.ensure_dirs().await?;

        let saved = self.store.try_load_state().await;
        if let Some(saved) = &saved {
            let mut runtime = self.runtime.write().await;
            // A crashed Running snapshot restarts Stopped.
            runtime.state = RuntimeState::Stopped;
            runtime.hdm_level = saved.hdm_level;
            runtime.last_cycle_run = saved.last_cycle_run.clone();
            runtime.cycle_history = saved.cycle_history.clone();
        }

        // Re-register persisted event triggers before the defaults claim
        // their ids, then replay fire state onto everything registered.
        if let Some(saved) = &saved {
            for projection in &saved.triggers {
                self.restore_trigger(projection).await;
            }
        }
        self.register_default_triggers().await;
        if let Some(saved) = &saved {
            for projection in &saved.triggers {
                self.triggers.restore(projection).await;
            }
        }

        self.plugins.initialize().await?;
        self.persist().await;

        info!("Engine initialized");
        Ok(())
    }

    async fn restore_trigger(&self, projection: &TriggerProjection) {
        if self.triggers.contains(&projection.id).await {
            return;
        }
        let Some(pattern) = &projection.pattern else {
            // Condition predicates are not serializable; defaults
            // re-register the built-in ones.
            tracing::debug!(trigger = %projection.id, "Skipping condition trigger from snapshot");
            return;
        };
        let config = TriggerConfig::event(
            projection.id.clone(),
            projection.name.clone(),
            pattern.clone(),
            projection.action.clone(),
            projection.hdm_level,
        );
        if let Err(e) = self.triggers.register(config).await {
            warn!(trigger = %projection.id, error = %e, "Failed to restore trigger");
        }
    }

    /// Start the engine: subscribe the `*` listener, arm the per-kind
    /// schedulers, and transition to Running. Idempotent while running.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        {
            let mut runtime = self.runtime.write().await;
            match runtime.state {
                RuntimeState::Running | RuntimeState::Paused => return Ok(()),
                RuntimeState::Stopped | RuntimeState::Error => {
                    runtime.state = RuntimeState::Running;
                }
            }
        }

        let weak = Arc::downgrade(self);
        let id = self
            .bus
            .on("*", move |event| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(engine) = weak.upgrade() {
                        engine.process_event(&event).await;
                    }
                    Ok(())
                })
            })
            .await?;
        *self.bus_subscription.lock().await = Some(id);

        for kind in CycleKind::scheduled() {
            self.arm(kind);
        }

        self.bus.emit(names::ENGINE_START, json!({})).await;
        self.persist().await;
        info!("Engine started");
        Ok(())
    }

    /// Stop the engine: cancel timers, drop the `*` subscription, and
    /// transition to Stopped. An in-progress cycle runs to completion.
    pub async fn stop(&self) -> EngineResult<()> {
        {
            let mut runtime = self.runtime.write().await;
            if runtime.state == RuntimeState::Stopped {
                return Ok(());
            }
            runtime.state = RuntimeState::Stopped;
        }

        self.scheduler.cancel_all();
        if let Some(id) = self.bus_subscription.lock().await.take() {
            self.bus.off(id).await;
        }

        self.bus.emit(names::ENGINE_STOP, json!({})).await;
        self.persist().await;
        info!("Engine stopped");
        Ok(())
    }

    /// Pause: timers stay armed but events are ignored and the cycle
    /// runner returns `None`.
    pub async fn pause(&self) -> EngineResult<()> {
        {
            let mut runtime = self.runtime.write().await;
            if runtime.state != RuntimeState::Running {
                return Err(EngineError::InvalidState {
                    from: runtime.state.to_string(),
                    to: "paused".to_string(),
                });
            }
            runtime.state = RuntimeState::Paused;
        }
        self.bus.emit(names::ENGINE_PAUSE, json!({})).await;
        self.persist().await;
        info!("Engine paused");
        Ok(())
    }

    pub async fn resume(&self) -> EngineResult<()> {
        {
            let mut runtime = self.runtime.write().await;
            if runtime.state != RuntimeState::Paused {
                return Err(EngineError::InvalidState {
                    from: runtime.state.to_string(),
                    to: "running".to_string(),
                });
            }
            runtime.state = RuntimeState::Running;
        }
        self.bus.emit(names::ENGINE_RESUME, json!({})).await;
        self.persist().await;
        info!("Engine resumed");
        Ok(())
    }

    /// Mark the engine failed. Scheduling stops; the snapshot survives.
    pub async fn mark_error(&self, reason: &str) {
        {
            let mut runtime = self.runtime.write().await;
            runtime.state = RuntimeState::Error;
        }
        self.scheduler.cancel_all();
        warn!(reason, "Engine entered error state");
        self.persist().await;
    }

    /// Register a trigger and persist the updated projection set.
    pub async fn register_trigger(
        &self,
        config: TriggerConfig,
    ) -> EngineResult<TriggerProjection> {
        let projection = self.triggers.register(config).await?;
        self.persist().await;
        Ok(projection)
    }

    pub async fn unregister_trigger(&self, id: &str) -> EngineResult<()> {
        self.triggers.unregister(id).await?;
        self.persist().await;
        Ok(())
    }

    pub async fn get_triggers(&self) -> Vec<TriggerProjection> {
        self.triggers.projections().await
    }

    /// Cycle reports, newest first, optionally filtered.
    pub async fn get_logs(&self, query: LogQuery) -> Vec<CycleReport> {
        let runtime = self.runtime.read().await;
        runtime
            .cycle_history
            .iter()
            .rev()
            .filter(|report| query.kind.map(|k| report.kind == k).unwrap_or(true))
            .filter(|report| query.status.map(|s| report.status == s).unwrap_or(true))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn get_status(&self) -> EngineStatus {
        let (state, hdm_level, last_cycle_run, cycles_recorded) = {
            let runtime = self.runtime.read().await;
            (
                runtime.state,
                runtime.hdm_level,
                runtime.last_cycle_run.clone(),
                runtime.cycle_history.len(),
            )
        };
        EngineStatus {
            state,
            hdm_level,
            last_cycle_run,
            trigger_count: self.triggers.all().await.len(),
            enabled_plugins: self.plugins.enabled_count().await,
            cycles_recorded,
        }
    }

    /// Raise or lower the approval ceiling.
    pub async fn set_hdm_level(&self, level: HdmLevel) {
        {
            let mut runtime = self.runtime.write().await;
            runtime.hdm_level = level;
        }
        info!(level = %level, "HDM level changed");
        self.persist().await;
    }

    pub async fn hdm_level(&self) -> HdmLevel {
        self.runtime.read().await.hdm_level
    }

    pub async fn runtime_state(&self) -> RuntimeState {
        self.runtime.read().await.state
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn plugins(&self) -> Arc<PluginManager> {
        self.plugins.clone()
    }

    pub fn registrar(&self) -> Arc<PluginRegistrar> {
        self.registrar.clone()
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn task_handlers(&self) -> Arc<TaskHandlerRegistry> {
        self.task_handlers.clone()
    }

    /// Snapshot of runtime state for internal use.
    pub(crate) async fn runtime_snapshot(&self) -> (RuntimeState, HdmLevel) {
        let runtime = self.runtime.read().await;
        (runtime.state, runtime.hdm_level)
    }

    /// Record a finished cycle: stamp `last_cycle_run` for completed
    /// runs and append to the capped history.
    pub(crate) async fn record_cycle(&self, report: &CycleReport) {
        let mut runtime = self.runtime.write().await;
        if let Some(end) = report.end_time {
            if matches!(
                report.status,
                CycleStatus::Completed | CycleStatus::CompletedWithErrors
            ) {
                runtime.last_cycle_run.set(report.kind, end);
            }
        }
        runtime.cycle_history.push(report.clone());
        if runtime.cycle_history.len() > self.config.max_history {
            let excess = runtime.cycle_history.len() - self.config.max_history;
            runtime.cycle_history.drain(..excess);
        }
    }

    /// Persist the current snapshot. Persistence failures are logged and
    /// never fatal to live behavior.
    pub(crate) async fn persist(&self) {
        let triggers = self.triggers.projections().await;
        let state = {
            let runtime = self.runtime.read().await;
            EngineState {
                state: runtime.state,
                hdm_level: runtime.hdm_level,
                last_cycle_run: runtime.last_cycle_run.clone(),
                cycle_history: runtime.cycle_history.clone(),
                triggers,
                updated_at: self.clock.now(),
            }
        };

        if let Err(e) = self.store.save_state(&state).await {
            warn!(error = %e, "Failed to persist engine state");
        }
    }
}
