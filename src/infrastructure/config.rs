//! Configuration loader with hierarchical merging.

use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::{EngineConfig, ScheduleSpec};
use crate::domain::models::cycle::CycleKind;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {kind} schedule: hour {hour} must be 0..=23")]
    InvalidHour { kind: CycleKind, hour: u32 },

    #[error("Invalid {kind} schedule: minute {minute} must be 0..=59")]
    InvalidMinute { kind: CycleKind, minute: u32 },

    #[error("Invalid weekly schedule: day_of_week {0} must be 0 (Sunday)..=6")]
    InvalidDayOfWeek(u32),

    #[error("Invalid monthly schedule: day_of_month {0} must be 1..=31")]
    InvalidDayOfMonth(u32),

    #[error("max_history must be at least 1")]
    ZeroHistory,

    #[error("max_event_history must be at least 1")]
    ZeroEventHistory,

    #[error("task_timeout_secs must be at least 1")]
    ZeroTaskTimeout,

    #[error(
        "Invalid retry backoff: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a root directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. `<root>/.eaos/config.yaml`
    /// 3. Environment variables (`EAOS_*` prefix, highest priority)
    pub fn load(root: impl AsRef<Path>) -> Result<EngineConfig> {
        let root = root.as_ref();
        let mut config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(root.join(".eaos").join("config.yaml")))
            .merge(Env::prefixed("EAOS_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        config.root_dir = root.to_path_buf();
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        for kind in CycleKind::scheduled() {
            let Some(spec) = config.schedules.get(kind) else {
                continue;
            };
            Self::validate_schedule(kind, spec)?;
        }

        if let Some(dow) = config.schedules.weekly.day_of_week {
            if dow > 6 {
                return Err(ConfigError::InvalidDayOfWeek(dow));
            }
        }
        if let Some(dom) = config.schedules.monthly.day_of_month {
            if dom == 0 || dom > 31 {
                return Err(ConfigError::InvalidDayOfMonth(dom));
            }
        }

        if config.max_history == 0 {
            return Err(ConfigError::ZeroHistory);
        }
        if config.max_event_history == 0 {
            return Err(ConfigError::ZeroEventHistory);
        }
        if config.task_timeout_secs == 0 {
            return Err(ConfigError::ZeroTaskTimeout);
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }

    fn validate_schedule(kind: CycleKind, spec: ScheduleSpec) -> Result<(), ConfigError> {
        if spec.hour > 23 {
            return Err(ConfigError::InvalidHour {
                kind,
                hour: spec.hour,
            });
        }
        if spec.minute > 59 {
            return Err(ConfigError::InvalidMinute {
                kind,
                minute: spec.minute,
            });
        }
        Ok(())
    }
}
