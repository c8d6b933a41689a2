//! Domain errors for the autonomy engine.

use thiserror::Error;

/// Errors surfaced by engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Filesystem error at {path}: {source}")]
    FileSystem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{subject} timed out after {secs}s")]
    Timeout { subject: String, secs: u64 },

    #[error("Plugin {plugin} requires dependency {dependency} which is not loaded")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Plugin {plugin} is still required by {dependent}")]
    DependencyInUse { plugin: String, dependent: String },

    #[error("Failed to load plugin {plugin}: {reason}")]
    PluginLoad { plugin: String, reason: String },

    #[error("Hook {hook} of plugin {plugin} failed: {reason}")]
    PluginHook {
        plugin: String,
        hook: String,
        reason: String,
    },

    #[error("Handler failed: {0}")]
    HandlerFailure(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidState { from: String, to: String },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether a task execution error should be retried.
    ///
    /// Only deadline expirations are retryable; every other failure kind
    /// falls through to the task result.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    /// Filesystem error helper carrying the offending path.
    pub fn filesystem(path: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::FileSystem {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = EngineError::Timeout {
            subject: "security-sweep".to_string(),
            secs: 60,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_errors_not_retryable() {
        assert!(!EngineError::Validation("bad id".to_string()).is_retryable());
        assert!(!EngineError::HandlerFailure("boom".to_string()).is_retryable());
        assert!(!EngineError::UnknownAction("nope".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::MissingDependency {
            plugin: "reporter".to_string(),
            dependency: "metrics".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Plugin reporter requires dependency metrics which is not loaded"
        );
    }
}
