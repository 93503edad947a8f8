// src/scheduler/task.rs
//! Tasks: caller-submitted units of work
//!
//! A task is immutable after submission; the scheduler tracks its mutable
//! retry state in a `Job`.

use crate::kernel::language::Language;
use crate::utils::config::ExecutionSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulid::Ulid;

/// Unique task identifier, supplied by the caller or generated at creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of requested work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,

    /// Research cycle this task belongs to
    pub cycle_id: String,

    /// Source code to execute
    pub code: String,

    /// Interpreter to run it in
    pub language: Language,

    /// Admission priority (higher runs earlier)
    pub priority: u32,

    /// Attempt ceiling, counting the first run
    pub max_attempts: u32,

    /// Wall-clock budget per attempt
    pub timeout: Duration,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with the built-in defaults (priority 0, 3 attempts,
    /// 120s per attempt, matching the `ExecutionSettings` defaults).
    pub fn new(cycle_id: impl Into<String>, code: impl Into<String>, language: Language) -> Self {
        Self {
            id: TaskId::new(),
            cycle_id: cycle_id.into(),
            code: code.into(),
            language,
            priority: 0,
            max_attempts: 3,
            timeout: Duration::from_secs(120),
            created_at: Utc::now(),
        }
    }

    /// Create a task seeded from the configured execution defaults
    pub fn with_settings(
        cycle_id: impl Into<String>,
        code: impl Into<String>,
        language: Language,
        settings: &ExecutionSettings,
    ) -> Self {
        let mut task = Self::new(cycle_id, code, language);
        task.max_attempts = settings.max_attempts_default;
        task.timeout = settings.default_timeout();
        task
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
