// src/utils/errors.rs
//! Engine error taxonomy
//!
//! Distinguishes substrate failures (pool exhaustion, provisioning, session
//! transport) from task-code failures, which never surface here: those travel
//! inside `ExecutionResult.error` with the attempt history.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the execution engine itself
#[derive(Debug, Error)]
pub enum EngineError {
    /// No idle container became available within the acquire wait timeout.
    /// Recoverable: the caller can retry the cycle later.
    #[error("container pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    /// Provisioning a new container failed. Infrastructure, not task code.
    #[error("container provisioning failed: {0}")]
    Provision(String),

    /// Spawning an interpreter process failed
    #[error("process spawn failed: {0}")]
    Spawn(String),

    /// I/O against a live session failed (broken pipe, malformed frame)
    #[error("session transport failure: {0}")]
    Transport(String),

    /// The session is gone or was never established
    #[error("session unavailable: {0}")]
    Session(String),

    /// An execution exceeded its wall-clock budget
    #[error("execution timed out")]
    ExecutionTimeout,

    /// A lease token does not map to any live slot
    #[error("unknown lease: {0}")]
    UnknownLease(String),

    /// The pool is shutting down and no longer hands out leases
    #[error("pool is shut down")]
    ShuttingDown,

    /// Configuration could not be loaded or failed validation
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// True for failures of the execution substrate rather than task code.
    /// The scheduler reports these distinctly and never routes them to repair.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, EngineError::ExecutionTimeout)
    }

    /// Short stable name used in telemetry and synthesized results
    pub fn name(&self) -> &'static str {
        match self {
            EngineError::PoolExhausted(_) => "PoolExhausted",
            EngineError::Provision(_) => "Provision",
            EngineError::Spawn(_) => "Spawn",
            EngineError::Transport(_) => "Transport",
            EngineError::Session(_) => "Session",
            EngineError::ExecutionTimeout => "ExecutionTimeout",
            EngineError::UnknownLease(_) => "UnknownLease",
            EngineError::ShuttingDown => "ShuttingDown",
            EngineError::Config(_) => "Config",
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        EngineError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_split() {
        assert!(EngineError::PoolExhausted(Duration::from_secs(30)).is_infrastructure());
        assert!(EngineError::Provision("oom".into()).is_infrastructure());
        assert!(!EngineError::ExecutionTimeout.is_infrastructure());
    }

    #[test]
    fn test_error_names() {
        assert_eq!(EngineError::PoolExhausted(Duration::ZERO).name(), "PoolExhausted");
        assert_eq!(EngineError::Provision(String::new()).name(), "Provision");
    }
}
