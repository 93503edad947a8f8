// src/kernel/outcome.rs
//! Execution outcome types
//!
//! `SessionOutcome` is the raw, unclassified reply from a session's bootstrap
//! harness. `ExecutionResult` is the classified record of one run attempt:
//! immutable once produced, accumulated per job, with the final one becoming
//! the job's terminal result.

use crate::recovery::classifier::{self, ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An error raised inside the interpreter, as reported by the harness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaisedError {
    /// Error type name, e.g. `ModuleNotFoundError` or `SyntaxError`
    pub ename: String,

    /// Error message
    pub evalue: String,

    /// Formatted traceback text, when the interpreter provides one
    pub traceback: Option<String>,
}

/// Raw reply to one executed code block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOutcome {
    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Last expression's value, when it serialized cleanly
    pub value: Option<serde_json::Value>,

    /// Printable rendering of the last expression's value
    pub value_repr: Option<String>,

    /// Raised error, if the block did not complete
    pub error: Option<RaisedError>,
}

/// Classified failure attached to an `ExecutionResult`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Retry-policy-relevant category
    pub kind: ErrorKind,

    /// Error type name (interpreter error class, or engine error name for
    /// substrate failures)
    pub ename: String,

    /// Error message
    pub message: String,

    /// Traceback text, when available
    pub traceback: Option<String>,
}

/// Outcome of one run attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Last expression's value
    pub return_value: Option<serde_json::Value>,

    /// Failure, if any
    pub error: Option<ExecutionError>,

    /// Wall-clock duration of the attempt
    pub duration: Duration,

    /// 1-based attempt number within the job
    pub attempt: u32,
}

impl ExecutionResult {
    /// Build a classified result from a raw session reply
    pub fn from_outcome(outcome: SessionOutcome, duration: Duration, attempt: u32) -> Self {
        let error = outcome.error.map(|raised| ExecutionError {
            kind: classifier::classify_raised(&raised.ename, &raised.evalue),
            ename: raised.ename,
            message: raised.evalue,
            traceback: raised.traceback,
        });

        let return_value = match outcome.value {
            Some(v) => Some(v),
            None => outcome.value_repr.map(serde_json::Value::String),
        };

        Self {
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            return_value,
            error,
            duration,
            attempt,
        }
    }

    /// Synthesize a failed result for conditions with no interpreter reply
    /// (timeouts, infrastructure failures, cycle deadline).
    pub fn failure(
        kind: ErrorKind,
        ename: impl Into<String>,
        message: impl Into<String>,
        duration: Duration,
        attempt: u32,
    ) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
            error: Some(ExecutionError {
                kind,
                ename: ename.into(),
                message: message.into(),
                traceback: None,
            }),
            duration,
            attempt,
        }
    }

    /// True when the attempt completed without error
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The classified kind of this result's error, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
