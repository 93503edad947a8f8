// src/kernel/client.rs
//! Kernel client
//!
//! Runs one code block against a leased container and turns whatever happens
//! (a clean reply, a raised error, a wall-clock timeout, a cancelled cycle,
//! a transport failure) into one classified `ExecutionResult`.
//!
//! Attempts against the same lease are strictly sequential; distinct leases
//! execute fully in parallel up to the pool's capacity.

use crate::kernel::outcome::ExecutionResult;
use crate::pool::container_pool::ContainerPool;
use crate::pool::slot::LeaseId;
use crate::recovery::classifier::ErrorKind;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Client for executing code in leased containers
pub struct KernelClient {
    pool: Arc<ContainerPool>,
}

impl KernelClient {
    pub fn new(pool: Arc<ContainerPool>) -> Self {
        Self { pool }
    }

    /// Execute `code` in the container behind `lease`, waiting up to
    /// `timeout`.
    ///
    /// Always resolves to an `ExecutionResult` for a live lease: timeouts
    /// interrupt the in-flight execution and come back as `Timeout`, a fired
    /// cancellation token as `CycleDeadline`, transport failures as
    /// `Infrastructure`. The error is only for leases the pool no longer
    /// knows.
    pub async fn run(
        &self,
        lease: &LeaseId,
        code: &str,
        attempt: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let session = self.pool.session(lease)?;
        let started = Instant::now();

        let result = select! {
            _ = cancel.cancelled() => {
                warn!(%lease, attempt, "cycle cancelled mid-execution, interrupting");
                session.interrupt().await;
                ExecutionResult::failure(
                    ErrorKind::CycleDeadline,
                    "CycleDeadlineExceeded",
                    "cycle deadline elapsed while the attempt was executing",
                    started.elapsed(),
                    attempt,
                )
            }
            outcome = session.execute(code, timeout) => match outcome {
                Ok(outcome) => ExecutionResult::from_outcome(outcome, started.elapsed(), attempt),
                Err(EngineError::ExecutionTimeout) => {
                    warn!(%lease, attempt, ?timeout, "attempt timed out, interrupting");
                    session.interrupt().await;
                    ExecutionResult::failure(
                        ErrorKind::Timeout,
                        "ExecutionTimeout",
                        format!("attempt exceeded its {timeout:?} budget"),
                        started.elapsed(),
                        attempt,
                    )
                }
                Err(e) => {
                    warn!(%lease, attempt, "attempt hit infrastructure failure: {e}");
                    ExecutionResult::failure(
                        ErrorKind::Infrastructure,
                        e.name(),
                        e.to_string(),
                        started.elapsed(),
                        attempt,
                    )
                }
            }
        };

        debug!(
            %lease,
            attempt,
            kind = result.error_kind().map(|k| k.as_str()).unwrap_or("success"),
            duration_ms = result.duration.as_millis() as u64,
            "attempt finished"
        );
        Ok(result)
    }
}
