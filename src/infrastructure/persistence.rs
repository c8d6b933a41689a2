//! JSON state store.
//!
//! Durable snapshots live under `<root>/.eaos/autonomy/`: `state.json`
//! holds the engine snapshot, `logs/` one file per completed cycle, and
//! `last_cycle_report.json` an overwrite-in-place copy of the most
//! recent report. All writes go through temp-file-plus-rename and are
//! serialized by an internal mutex; a missing or malformed state file
//! yields a fresh default instead of failing engine init.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::cycle::CycleReport;
use crate::domain::models::state::EngineState;

const STATE_FILE: &str = "state.json";
const LAST_REPORT_FILE: &str = "last_cycle_report.json";
/// Cycle reports kept inside the state snapshot.
const SNAPSHOT_HISTORY: usize = 10;

/// Durable store for the engine snapshot and cycle reports.
pub struct StateStore {
    autonomy_dir: PathBuf,
    logs_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(root: &Path) -> Self {
        let autonomy_dir = root.join(".eaos").join("autonomy");
        let logs_dir = autonomy_dir.join("logs");
        Self {
            autonomy_dir,
            logs_dir,
            write_lock: Mutex::new(()),
        }
    }

    /// Idempotent creation of the autonomy directory and its logs
    /// subdirectory.
    pub async fn ensure_dirs(&self) -> EngineResult<()> {
        tokio::fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(|e| EngineError::filesystem(self.logs_dir.display().to_string(), e))
    }

    pub fn state_path(&self) -> PathBuf {
        self.autonomy_dir.join(STATE_FILE)
    }

    /// Read the persisted snapshot. A missing or malformed file logs and
    /// returns a fresh default; engine init never fails on state reads.
    pub async fn load_state(&self) -> EngineState {
        self.try_load_state().await.unwrap_or_default()
    }

    /// Like `load_state`, but distinguishes "no usable snapshot" so the
    /// caller can apply construction-time defaults instead.
    pub async fn try_load_state(&self) -> Option<EngineState> {
        let path = self.state_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<EngineState>(&raw) {
                Ok(state) => {
                    info!(path = %path.display(), "Loaded engine state");
                    Some(state)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed state file, starting fresh");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read state file, starting fresh");
                None
            }
        }
    }

    /// Persist the snapshot atomically. The stored projection keeps only
    /// the most recent cycle reports.
    pub async fn save_state(&self, state: &EngineState) -> EngineResult<()> {
        let mut snapshot = state.clone();
        if snapshot.cycle_history.len() > SNAPSHOT_HISTORY {
            let skip = snapshot.cycle_history.len() - SNAPSHOT_HISTORY;
            snapshot.cycle_history.drain(..skip);
        }

        let contents = serde_json::to_string_pretty(&snapshot)?;
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.state_path(), &contents).await
    }

    /// Write `cycle_<kind>_<id>.json` under logs and overwrite
    /// `last_cycle_report.json`.
    pub async fn write_cycle_report(&self, report: &CycleReport) -> EngineResult<()> {
        let contents = serde_json::to_string_pretty(report)?;
        let report_path = self
            .logs_dir
            .join(format!("cycle_{}_{}.json", report.kind, report.id));

        let _guard = self.write_lock.lock().await;
        write_atomic(&report_path, &contents).await?;
        write_atomic(&self.autonomy_dir.join(LAST_REPORT_FILE), &contents).await
    }

    /// Read back the most recent cycle report, if any.
    pub async fn load_last_report(&self) -> Option<CycleReport> {
        let path = self.autonomy_dir.join(LAST_REPORT_FILE);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        serde_json::from_str(&raw).ok()
    }
}

/// Write to a temp file in the target directory, then rename over the
/// destination.
async fn write_atomic(path: &Path, contents: &str) -> EngineResult<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| EngineError::filesystem(tmp.display().to_string(), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| EngineError::filesystem(path.display().to_string(), e))
}
