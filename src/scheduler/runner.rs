// src/scheduler/runner.rs
//! Per-job driver
//!
//! Runs one job to a terminal state: acquire a lease, execute attempts
//! strictly in sequence, classify failures, consult the repair gate when
//! policy allows, rotate the lease after a poisoned session, and release on
//! every exit path. Classification and retry decisions never leave this
//! module; callers only see the terminal report.

use crate::kernel::client::KernelClient;
use crate::kernel::outcome::ExecutionResult;
use crate::pool::container_pool::ContainerPool;
use crate::pool::slot::{HealthHint, LeaseId};
use crate::recovery::classifier::{ErrorKind, RetryPolicy};
use crate::recovery::repair::{CodeRepairer, RepairGate};
use crate::scheduler::job::{Job, TaskReport};
use crate::scheduler::task::Task;
use crate::utils::config::SchedulerSettings;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives single jobs through their attempt/repair loop
pub struct JobRunner {
    pool: Arc<ContainerPool>,
    client: KernelClient,
    repair: RepairGate,
    settings: SchedulerSettings,
}

impl JobRunner {
    pub fn new(
        pool: Arc<ContainerPool>,
        repairer: Arc<dyn CodeRepairer>,
        settings: SchedulerSettings,
    ) -> Self {
        let client = KernelClient::new(Arc::clone(&pool));
        let repair = RepairGate::new(repairer, settings.repair_timeout());
        Self {
            pool,
            client,
            repair,
            settings,
        }
    }

    /// Run `task` to a terminal state. Cancellation (cycle deadline or
    /// caller) interrupts the in-flight attempt, force-releases the container
    /// for recycling, and reports `CycleDeadline`.
    pub async fn run(&self, task: Arc<Task>, cancel: &CancellationToken) -> TaskReport {
        let mut job = Job::new(Arc::clone(&task));
        let mut code = task.code.clone();
        let mut lease: Option<LeaseId> = None;
        let mut timeout_retried = false;

        debug!(task = %task.id, priority = task.priority, "job admitted");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if lease.is_none() {
                let acquired = tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = self.pool.acquire(task.language) => Some(result),
                };
                match acquired {
                    None => break,
                    Some(Ok(acquired_lease)) => {
                        job.set_lease(acquired_lease.clone());
                        lease = Some(acquired_lease);
                    }
                    Some(Err(e)) => {
                        // Substrate unavailable: terminal, never routed to
                        // repair, and distinguishable from task failure.
                        warn!(task = %task.id, "execution substrate unavailable: {e}");
                        job.fail(ExecutionResult::failure(
                            ErrorKind::Infrastructure,
                            e.name(),
                            e.to_string(),
                            Duration::ZERO,
                            job.attempt_count(),
                        ));
                        break;
                    }
                }
            }

            let attempt = job.begin_attempt();
            let held_lease = lease.as_ref().expect("running job holds a lease");
            let result = match self
                .client
                .run(held_lease, &code, attempt, task.timeout, cancel)
                .await
            {
                Ok(result) => result,
                Err(e) => ExecutionResult::failure(
                    ErrorKind::Infrastructure,
                    e.name(),
                    e.to_string(),
                    Duration::ZERO,
                    attempt,
                ),
            };
            job.record_attempt(&result);
            self.emit_attempt(&task, &result);

            let Some(error) = result.error.clone() else {
                info!(task = %task.id, attempt, "task succeeded");
                job.succeed(result);
                self.release(&mut job, &mut lease, HealthHint::Healthy).await;
                break;
            };

            let hint = if error.kind.poisons_session() {
                HealthHint::Corrupted
            } else {
                HealthHint::Healthy
            };
            let attempts_left = job.attempt_count() < task.max_attempts;

            match error.kind.retry_policy() {
                RetryPolicy::Terminal => {
                    info!(task = %task.id, attempt, kind = %error.kind, "task failed terminally");
                    job.fail(result);
                    self.release(&mut job, &mut lease, hint).await;
                    break;
                }

                RetryPolicy::RetryOnce => {
                    if attempts_left && !timeout_retried {
                        debug!(task = %task.id, attempt, "timeout assumed transient, retrying once");
                        timeout_retried = true;
                        job.retry_pending();
                        // The interrupted session must not be reused; the
                        // retry runs on a fresh lease with the same code.
                        self.release(&mut job, &mut lease, hint).await;
                        if !self.backoff(cancel).await {
                            break;
                        }
                    } else {
                        job.fail(result);
                        self.release(&mut job, &mut lease, hint).await;
                        break;
                    }
                }

                RetryPolicy::RepairAndRetry => {
                    if !attempts_left {
                        info!(task = %task.id, attempt, kind = %error.kind, "attempts exhausted");
                        job.fail(result);
                        self.release(&mut job, &mut lease, hint).await;
                        break;
                    }

                    job.retry_pending();
                    let repair = self.repair.attempt(job.attempt_count(), &code, &error).await;
                    let accepted = repair.accepted;
                    let candidate = repair.candidate_code.clone();
                    job.record_repair(repair);

                    if !accepted {
                        // Unusable candidate: terminal without consuming a
                        // further attempt.
                        info!(task = %task.id, attempt, kind = %error.kind, "repair rejected, giving up");
                        job.fail(result);
                        self.release(&mut job, &mut lease, hint).await;
                        break;
                    }

                    // The session (and its variable bindings) is kept; the
                    // repaired code resubmits on the same lease.
                    code = candidate.expect("accepted repair carries a candidate");
                    debug!(task = %task.id, attempt, "repair accepted, resubmitting");
                    if !self.backoff(cancel).await {
                        break;
                    }
                }
            }
        }

        // Cancellation path: whatever the job was doing, the container goes
        // back for recycling and the partial state is reported.
        if lease.is_some() {
            self.release(&mut job, &mut lease, HealthHint::Corrupted).await;
        }
        job.finish_deadline_exceeded();
        job.into_report()
    }

    async fn release(&self, job: &mut Job, lease: &mut Option<LeaseId>, hint: HealthHint) {
        if let Some(lease) = lease.take() {
            self.pool.release(lease, hint).await;
            job.clear_lease();
        }
    }

    /// Pause before a re-attempt. Returns false when cancelled mid-backoff.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        let jitter_ms = self.settings.retry_backoff_jitter_ms;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let pause = self.settings.retry_backoff() + jitter;

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(pause) => true,
        }
    }

    fn emit_attempt(&self, task: &Task, result: &ExecutionResult) {
        let kind = result
            .error_kind()
            .map(|k| k.as_str())
            .unwrap_or("success");
        metrics::counter!("engine_attempts_total", "kind" => kind).increment(1);
        metrics::histogram!("engine_attempt_duration_seconds")
            .record(result.duration.as_secs_f64());
        info!(
            task = %task.id,
            attempt = result.attempt,
            kind,
            duration_ms = result.duration.as_millis() as u64,
            "attempt telemetry"
        );
    }
}
