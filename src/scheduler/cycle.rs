// src/scheduler/cycle.rs
//! Cycle scheduler
//!
//! Turns a cycle's approved task list into a bounded set of concurrently
//! running jobs. A fixed number of lanes drain a priority-ordered queue; each
//! lane runs one job to its terminal state (including the whole retry/repair
//! loop) before picking up the next task. The cycle deadline and caller
//! cancellation share one token: when it fires, in-flight executions are
//! interrupted, containers are force-released for recycling, and the partial
//! result set is returned.

use crate::pool::container_pool::ContainerPool;
use crate::recovery::repair::CodeRepairer;
use crate::scheduler::job::{Job, TaskReport};
use crate::scheduler::runner::JobRunner;
use crate::scheduler::task::{Task, TaskId};
use crate::utils::config::{EngineConfig, SchedulerSettings};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result set for one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Terminal report per task
    pub results: HashMap<TaskId, TaskReport>,

    /// Whether the cycle was cut short by its deadline or cancellation
    pub deadline_exceeded: bool,

    /// Wall-clock duration of the cycle
    pub duration: Duration,
}

impl CycleReport {
    pub fn get(&self, id: &TaskId) -> Option<&TaskReport> {
        self.results.get(id)
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Schedules a cycle's tasks across a bounded set of execution lanes
pub struct CycleScheduler {
    runner: Arc<JobRunner>,
    settings: SchedulerSettings,
}

impl CycleScheduler {
    pub fn new(
        pool: Arc<ContainerPool>,
        repairer: Arc<dyn CodeRepairer>,
        config: &EngineConfig,
    ) -> Self {
        let settings = config.scheduler.clone();
        let runner = Arc::new(JobRunner::new(pool, repairer, settings.clone()));
        Self { runner, settings }
    }

    /// Run a cycle to completion or until the configured deadline
    pub async fn run_cycle(&self, tasks: Vec<Task>) -> CycleReport {
        self.run_cycle_with_cancel(tasks, CancellationToken::new())
            .await
    }

    /// Run a cycle under a caller-owned cancellation token. Cancelling the
    /// token has the same effect as the deadline elapsing: partial results,
    /// never discarded work.
    pub async fn run_cycle_with_cancel(
        &self,
        tasks: Vec<Task>,
        cancel: CancellationToken,
    ) -> CycleReport {
        let started = Instant::now();
        let total = tasks.len();

        // Priority is the primary admission key; the sort is stable, so
        // submission order breaks ties.
        let mut ordered: Vec<Arc<Task>> = tasks.into_iter().map(Arc::new).collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let lanes = self.settings.concurrency_limit.min(total);
        info!(tasks = total, lanes, "starting cycle");

        let queue = Arc::new(parking_lot::Mutex::new(VecDeque::from(ordered)));
        let reports: Arc<DashMap<TaskId, TaskReport>> = Arc::new(DashMap::new());
        let token = cancel.child_token();

        let watchdog = {
            let token = token.clone();
            let deadline = self.settings.cycle_deadline();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        warn!(?deadline, "cycle deadline elapsed, cancelling in-flight jobs");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        };

        let mut handles = Vec::with_capacity(lanes);
        for lane in 0..lanes {
            let queue = Arc::clone(&queue);
            let reports = Arc::clone(&reports);
            let runner = Arc::clone(&self.runner);
            let token = token.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let Some(task) = queue.lock().pop_front() else { break };
                    debug!(lane, task = %task.id, "lane picked up task");

                    let report = if token.is_cancelled() {
                        deadline_report(&task)
                    } else {
                        runner.run(Arc::clone(&task), &token).await
                    };
                    reports.insert(report.task_id.clone(), report);
                }
            }));
        }

        futures::future::join_all(handles).await;
        watchdog.abort();

        let deadline_exceeded = token.is_cancelled();
        let results: HashMap<TaskId, TaskReport> = match Arc::try_unwrap(reports) {
            Ok(map) => map.into_iter().collect(),
            Err(arc) => arc
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };

        let report = CycleReport {
            results,
            deadline_exceeded,
            duration: started.elapsed(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            deadline_exceeded,
            duration_ms = report.duration.as_millis() as u64,
            "cycle finished"
        );
        report
    }
}

/// Report for a task the deadline caught before it ever started
fn deadline_report(task: &Arc<Task>) -> TaskReport {
    let mut job = Job::new(Arc::clone(task));
    job.finish_deadline_exceeded();
    job.into_report()
}
