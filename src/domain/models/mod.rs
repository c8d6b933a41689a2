//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod approval;
pub mod config;
pub mod cycle;
pub mod event;
pub mod hook;
pub mod plugin;
pub mod state;
pub mod trigger;

pub use approval::HdmLevel;
pub use config::{EngineConfig, ScheduleSpec, Schedules};
pub use cycle::{CycleKind, CycleReport, CycleStatus, CycleTask, TaskResult, TaskStatus};
pub use event::BusEvent;
pub use hook::{HookContext, HookKind};
pub use plugin::{Plugin, PluginManifest, PluginState};
pub use state::{EngineState, LastCycleRun, RuntimeState};
pub use trigger::{Trigger, TriggerConfig, TriggerKind, TriggerMatch, TriggerProjection};
