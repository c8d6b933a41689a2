use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::approval::HdmLevel;
use super::cycle::CycleKind;

/// Main configuration structure for the autonomy engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory for persistence (`<root>/.eaos/autonomy`) and
    /// plugins (`<root>/plugins`).
    pub root_dir: PathBuf,

    /// Initial approval ceiling. A persisted snapshot overrides this on
    /// initialize.
    pub hdm_level: HdmLevel,

    /// Per-kind schedule overrides.
    pub schedules: Schedules,

    /// In-memory cycle history cap.
    pub max_history: usize,

    /// Event bus history ring cap.
    pub max_event_history: usize,

    /// Per-task execution deadline in seconds.
    pub task_timeout_secs: u64,

    /// Task retry policy (timeouts only).
    pub retry: RetryConfig,

    /// Logging configuration.
    pub logging: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            hdm_level: HdmLevel::Supervised,
            schedules: Schedules::default(),
            max_history: 100,
            max_event_history: 100,
            task_timeout_secs: 60,
            retry: RetryConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }
}

/// Wall-clock schedule for one cycle kind.
///
/// `day_of_week` uses 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub hour: u32,
    pub minute: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
}

/// Per-kind schedules. Defaults: daily 02:00, weekly Sunday 03:00,
/// monthly day 1 at 04:00 (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedules {
    pub daily: ScheduleSpec,
    pub weekly: ScheduleSpec,
    pub monthly: ScheduleSpec,
}

impl Default for Schedules {
    fn default() -> Self {
        Self {
            daily: ScheduleSpec {
                hour: 2,
                minute: 0,
                day_of_week: None,
                day_of_month: None,
            },
            weekly: ScheduleSpec {
                hour: 3,
                minute: 0,
                day_of_week: Some(0),
                day_of_month: None,
            },
            monthly: ScheduleSpec {
                hour: 4,
                minute: 0,
                day_of_week: None,
                day_of_month: Some(1),
            },
        }
    }
}

impl Schedules {
    /// Schedule for a scheduled cycle kind; manual cycles have none.
    pub fn get(&self, kind: CycleKind) -> Option<ScheduleSpec> {
        match kind {
            CycleKind::Daily => Some(self.daily),
            CycleKind::Weekly => Some(self.weekly),
            CycleKind::Monthly => Some(self.monthly),
            CycleKind::Manual => None,
        }
    }
}

/// Retry configuration for task handlers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (json, pretty)
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}
