//! Persisted engine state snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::approval::HdmLevel;
use super::cycle::{CycleKind, CycleReport};
use super::trigger::TriggerProjection;

/// Runtime lifecycle state of the engine.
///
/// `Error` behaves as `Stopped` for scheduling but preserves the last
/// state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Stopped,
    Running,
    Paused,
    Error,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// End times of the most recent successfully completed cycle per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastCycleRun {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<DateTime<Utc>>,
}

impl LastCycleRun {
    pub fn get(&self, kind: CycleKind) -> Option<DateTime<Utc>> {
        match kind {
            CycleKind::Daily => self.daily,
            CycleKind::Weekly => self.weekly,
            CycleKind::Monthly => self.monthly,
            CycleKind::Manual => None,
        }
    }

    /// Manual cycles are not tracked.
    pub fn set(&mut self, kind: CycleKind, at: DateTime<Utc>) {
        match kind {
            CycleKind::Daily => self.daily = Some(at),
            CycleKind::Weekly => self.weekly = Some(at),
            CycleKind::Monthly => self.monthly = Some(at),
            CycleKind::Manual => {}
        }
    }
}

/// Canonical engine snapshot persisted to `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub state: RuntimeState,
    pub hdm_level: HdmLevel,
    #[serde(default)]
    pub last_cycle_run: LastCycleRun,
    #[serde(default)]
    pub cycle_history: Vec<CycleReport>,
    #[serde(default)]
    pub triggers: Vec<TriggerProjection>,
    pub updated_at: DateTime<Utc>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            state: RuntimeState::Stopped,
            hdm_level: HdmLevel::default(),
            last_cycle_run: LastCycleRun::default(),
            cycle_history: Vec::new(),
            triggers: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}
