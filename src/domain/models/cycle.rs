//! Cycle batteries, reports, and per-task results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval::HdmLevel;

/// Kind of cycle battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    Daily,
    Weekly,
    Monthly,
    Manual,
}

impl CycleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Manual => "manual",
        }
    }

    /// The three scheduled kinds, in scheduling order.
    pub fn scheduled() -> [CycleKind; 3] {
        [Self::Daily, Self::Weekly, Self::Monthly]
    }
}

impl std::fmt::Display for CycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named unit of work within a cycle, guarded by an approval level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleTask {
    pub id: String,
    pub name: String,
    pub hdm_level: HdmLevel,
}

impl CycleTask {
    pub fn new(id: impl Into<String>, name: impl Into<String>, hdm_level: HdmLevel) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hdm_level,
        }
    }
}

/// The fixed battery of tasks for a cycle kind.
///
/// Batteries are compile-time constants; the runner treats them as an
/// ordered sequence. Manual cycles reuse the daily battery.
pub fn battery(kind: CycleKind) -> Vec<CycleTask> {
    match kind {
        CycleKind::Daily | CycleKind::Manual => vec![
            CycleTask::new("security-sweep", "Security sweep", HdmLevel::Routine),
            CycleTask::new("dependency-audit", "Dependency audit", HdmLevel::Routine),
            CycleTask::new("log-hygiene", "Log hygiene", HdmLevel::Informational),
        ],
        CycleKind::Weekly => vec![
            CycleTask::new("security-scan", "Deep security scan", HdmLevel::Routine),
            CycleTask::new("performance-review", "Performance review", HdmLevel::Routine),
            CycleTask::new(
                "backup-verification",
                "Backup verification",
                HdmLevel::Supervised,
            ),
        ],
        CycleKind::Monthly => vec![
            CycleTask::new("compliance-scan", "Compliance scan", HdmLevel::Supervised),
            CycleTask::new(
                "dependency-upgrade",
                "Dependency upgrade plan",
                HdmLevel::Supervised,
            ),
            CycleTask::new("access-review", "Access review", HdmLevel::Supervised),
        ],
    }
}

/// Outcome of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Skipped,
    Error,
}

/// Outcome of one cycle run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Cancelled,
}

/// Durable record of one task execution inside a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Durable record of one cycle execution including per-task results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub id: String,
    pub kind: CycleKind,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskResult>,
    pub errors: Vec<String>,
    pub status: CycleStatus,
}

impl CycleReport {
    /// Begin a new report; status is `Running` exactly while `end_time`
    /// is absent.
    pub fn begin(kind: CycleKind, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            start_time,
            end_time: None,
            tasks: Vec::new(),
            errors: Vec::new(),
            status: CycleStatus::Running,
        }
    }

    /// Close the report, deriving the final status from accumulated errors.
    pub fn finish(&mut self, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
        self.status = if self.errors.is_empty() {
            CycleStatus::Completed
        } else {
            CycleStatus::CompletedWithErrors
        };
    }

    /// Close the report as cancelled by a before-cycle hook.
    pub fn cancel(&mut self, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
        self.status = CycleStatus::Cancelled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monthly_battery_is_supervised() {
        for task in battery(CycleKind::Monthly) {
            assert_eq!(task.hdm_level, HdmLevel::Supervised, "task {}", task.id);
        }
    }

    #[test]
    fn test_daily_battery_is_routine_or_below() {
        for task in battery(CycleKind::Daily) {
            assert!(task.hdm_level <= HdmLevel::Routine, "task {}", task.id);
        }
    }

    #[test]
    fn test_report_status_tracks_end_time() {
        let now = Utc::now();
        let mut report = CycleReport::begin(CycleKind::Daily, now);
        assert_eq!(report.status, CycleStatus::Running);
        assert!(report.end_time.is_none());

        report.finish(now + chrono::Duration::seconds(5));
        assert_eq!(report.status, CycleStatus::Completed);
        assert!(report.end_time.unwrap() >= report.start_time);
    }

    #[test]
    fn test_report_with_errors() {
        let now = Utc::now();
        let mut report = CycleReport::begin(CycleKind::Weekly, now);
        report.errors.push("security-scan: timed out".to_string());
        report.finish(now);
        assert_eq!(report.status, CycleStatus::CompletedWithErrors);
    }

    #[test]
    fn test_report_serde_camel_case() {
        let report = CycleReport::begin(CycleKind::Monthly, Utc::now());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("startTime").is_some());
        assert_eq!(json["kind"], "monthly");
        assert_eq!(json["status"], "running");
    }
}
