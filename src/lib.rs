//! EAOS Autonomy - Autonomous Operations Engine
//!
//! A self-driving maintenance engine for enterprise codebases with:
//! - Scheduled daily/weekly/monthly task batteries
//! - Event and condition triggers behind a human-approval gate
//! - In-process event bus with wildcard routing and bounded history
//! - Plugin lifecycle with dependency ordering and prioritized hooks
//! - Durable JSON state snapshots and per-cycle reports

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{EngineError, EngineResult};
pub use domain::models::approval::HdmLevel;
pub use domain::models::config::EngineConfig;
pub use domain::models::cycle::{CycleKind, CycleReport, CycleStatus, TaskResult, TaskStatus};
pub use services::engine::AutonomyEngine;
pub use services::event_bus::EventBus;
