// src/scheduler/job.rs
//! Jobs: the scheduler's mutable view of a task in flight
//!
//! State machine:
//!
//! ```text
//! PENDING ──> RUNNING ──> SUCCEEDED
//!                │  ▲
//!                │  └── RETRY_PENDING
//!                └────────> FAILED
//! ```
//!
//! `RETRY_PENDING` is entered only when classification policy allows a retry
//! and attempts remain; it resolves back to `RUNNING` once repair produces an
//! accepted candidate (or the code is resubmitted unchanged after a timeout).

use crate::kernel::outcome::ExecutionResult;
use crate::pool::slot::LeaseId;
use crate::recovery::classifier::ErrorKind;
use crate::recovery::repair::RepairAttempt;
use crate::scheduler::task::{Task, TaskId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    RetryPending,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn can_transition(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::RetryPending)
                | (JobStatus::RetryPending, JobStatus::Running)
                | (JobStatus::RetryPending, JobStatus::Failed)
        )
    }
}

/// Per-attempt telemetry, kept independent of the final result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,

    /// Classified failure kind, `None` for a clean attempt
    pub error_kind: Option<ErrorKind>,

    /// Wall-clock duration of the attempt
    pub duration: Duration,
}

/// Scheduler-side tracked instance of a task, including retry state
pub struct Job {
    task: Arc<Task>,
    status: JobStatus,
    attempt_count: u32,
    lease: Option<LeaseId>,
    attempts: Vec<AttemptRecord>,
    repairs: Vec<RepairAttempt>,
    result: Option<ExecutionResult>,
}

impl Job {
    pub fn new(task: Arc<Task>) -> Self {
        Self {
            task,
            status: JobStatus::Pending,
            attempt_count: 0,
            lease: None,
            attempts: Vec::new(),
            repairs: Vec::new(),
            result: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    fn transition(&mut self, to: JobStatus) {
        assert!(
            self.status.can_transition(to),
            "illegal job transition {:?} -> {:?} for task {}",
            self.status,
            to,
            self.task.id
        );
        trace!(task = %self.task.id, from = ?self.status, to = ?to, "job transition");
        self.status = to;
    }

    pub fn set_lease(&mut self, lease: LeaseId) {
        debug_assert!(self.lease.is_none(), "job already holds a lease");
        self.lease = Some(lease);
    }

    pub fn clear_lease(&mut self) {
        self.lease = None;
    }

    /// Start the next attempt. Panics if the attempt ceiling is violated,
    /// which would mean the runner's bookkeeping is broken.
    pub fn begin_attempt(&mut self) -> u32 {
        self.transition(JobStatus::Running);
        self.attempt_count += 1;
        assert!(
            self.attempt_count <= self.task.max_attempts,
            "attempt ceiling exceeded for task {}",
            self.task.id
        );
        self.attempt_count
    }

    pub fn record_attempt(&mut self, result: &ExecutionResult) {
        self.attempts.push(AttemptRecord {
            attempt: result.attempt,
            error_kind: result.error_kind(),
            duration: result.duration,
        });
    }

    pub fn retry_pending(&mut self) {
        self.transition(JobStatus::RetryPending);
    }

    pub fn record_repair(&mut self, repair: RepairAttempt) {
        self.repairs.push(repair);
    }

    pub fn succeed(&mut self, result: ExecutionResult) {
        self.transition(JobStatus::Succeeded);
        self.result = Some(result);
    }

    pub fn fail(&mut self, result: ExecutionResult) {
        self.transition(JobStatus::Failed);
        self.result = Some(result);
    }

    /// Terminate a job cut short by the cycle deadline or caller
    /// cancellation. No-op when the job already reached a terminal state.
    pub fn finish_deadline_exceeded(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let result = ExecutionResult::failure(
            ErrorKind::CycleDeadline,
            "CycleDeadlineExceeded",
            "cycle deadline elapsed before the task finished",
            Duration::ZERO,
            self.attempt_count,
        );
        self.transition(JobStatus::Failed);
        self.result = Some(result);
    }

    /// Consume the job into its per-task report. Must only be called on a
    /// terminal job; the runner guarantees this.
    pub fn into_report(self) -> TaskReport {
        debug_assert!(self.status.is_terminal(), "report of a non-terminal job");
        debug_assert!(self.lease.is_none(), "terminal job still holds a lease");
        let result = self
            .result
            .expect("terminal job always carries a final result");
        TaskReport {
            task_id: self.task.id.clone(),
            cycle_id: self.task.cycle_id.clone(),
            status: self.status,
            attempt_count: self.attempt_count,
            error_kind: result.error_kind(),
            repair_attempted: !self.repairs.is_empty(),
            repairs: self.repairs,
            attempts: self.attempts,
            result,
        }
    }
}

/// Terminal per-task report returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub cycle_id: String,

    /// Terminal status (`Succeeded` or `Failed`)
    pub status: JobStatus,

    /// Attempts actually executed
    pub attempt_count: u32,

    /// Kind of the final error, `None` on success
    pub error_kind: Option<ErrorKind>,

    /// Whether the repair collaborator was consulted
    pub repair_attempted: bool,

    /// Every repair cycle, in order
    pub repairs: Vec<RepairAttempt>,

    /// Per-attempt telemetry, in order
    pub attempts: Vec<AttemptRecord>,

    /// The final execution result
    pub result: ExecutionResult,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}
