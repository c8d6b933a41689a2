//! Logging initialization.

use tracing_subscriber::EnvFilter;

use crate::domain::models::config::{LogConfig, LogFormat};

/// Initialize the global tracing subscriber from config.
///
/// `RUST_LOG` overrides the configured level. Returns an error if a
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logging: {e}")),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logging: {e}")),
    }
}
