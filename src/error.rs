//! Error types for the logic engine

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy for the engine.
///
/// Unification failure and constraint-suspension failure are *not* errors:
/// they simply produce no emission for the input substitution. Cancellation
/// is silent termination and never surfaces here either. What remains is
/// store failures, configuration mistakes, and genuine engine bugs.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Transient backend failure (HTTP 5xx, connection reset, timeout)
    #[error("transient store failure: {message}")]
    StoreTransient { message: String },

    /// Permanent backend failure (HTTP 4xx, malformed query, bad response)
    #[error("permanent store failure: {message}")]
    StorePermanent { message: String },

    /// Operation crossed its deadline
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// Invalid configuration, rejected at construction time
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether a caller may reasonably retry the failed operation.
    /// The engine itself never retries; retry policy belongs to the store.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::StoreTransient { .. } | EngineError::Timeout { .. }
        )
    }

    pub fn transient(message: impl Into<String>) -> Self {
        EngineError::StoreTransient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        EngineError::StorePermanent {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EngineError::transient("503").is_transient());
        assert!(EngineError::Timeout {
            operation: "executeQuery".to_string(),
            duration_ms: 5000,
        }
        .is_transient());
        assert!(!EngineError::permanent("404").is_transient());
        assert!(!EngineError::Config("batch_size must be > 0".to_string()).is_transient());
    }

    #[test]
    fn display_includes_context() {
        let err = EngineError::Timeout {
            operation: "executeQuery".to_string(),
            duration_ms: 5000,
        };
        assert!(err.to_string().contains("5000"));
        assert!(err.to_string().contains("executeQuery"));
    }
}
