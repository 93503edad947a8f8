// src/recovery/repair.rs
//! Bounded LLM-assisted repair
//!
//! The repair collaborator is an external, LLM-backed service that may be slow
//! or unavailable. `RepairGate` wraps it with a sub-timeout and validates
//! candidates before a job is allowed to resubmit: an unusable candidate sends
//! the job straight to terminal failure without consuming another attempt.

use crate::kernel::outcome::ExecutionError;
use crate::recovery::classifier::ErrorKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// External code-repair collaborator.
///
/// Given failing code and its classified error, returns a candidate fix, or
/// `None` to refuse. Implementations live outside this crate.
#[async_trait]
pub trait CodeRepairer: Send + Sync {
    async fn propose_fix(
        &self,
        code: &str,
        kind: ErrorKind,
        error: &ExecutionError,
    ) -> anyhow::Result<Option<String>>;
}

/// Record of one repair cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    /// The failing attempt this repair responds to (1-based; always below
    /// the job's attempt ceiling, since repair implies a retry remains)
    pub attempt_number: u32,

    /// Classified kind of the failure being repaired
    pub input_error_kind: ErrorKind,

    /// The failing code handed to the collaborator
    pub original_code: String,

    /// The collaborator's candidate, if it produced one
    pub candidate_code: Option<String>,

    /// Whether the candidate passed validation and becomes the next attempt
    pub accepted: bool,
}

/// Applies the sub-timeout and candidate validation around a `CodeRepairer`
pub struct RepairGate {
    repairer: Arc<dyn CodeRepairer>,
    timeout: Duration,
}

impl RepairGate {
    pub fn new(repairer: Arc<dyn CodeRepairer>, timeout: Duration) -> Self {
        Self { repairer, timeout }
    }

    /// Request one candidate fix for `code`.
    ///
    /// Collaborator error, timeout, refusal, or an unusable candidate all
    /// yield `accepted = false`.
    pub async fn attempt(
        &self,
        attempt_number: u32,
        code: &str,
        error: &ExecutionError,
    ) -> RepairAttempt {
        let kind = error.kind;
        debug!(%kind, attempt_number, "requesting repair candidate");

        let proposal =
            tokio::time::timeout(self.timeout, self.repairer.propose_fix(code, kind, error)).await;

        let candidate = match proposal {
            Ok(Ok(candidate)) => candidate,
            Ok(Err(e)) => {
                warn!(%kind, "repair collaborator failed: {e}");
                None
            }
            Err(_) => {
                warn!(%kind, timeout = ?self.timeout, "repair collaborator timed out");
                None
            }
        };

        let accepted = candidate
            .as_deref()
            .map(|c| usable_candidate(code, c))
            .unwrap_or(false);

        metrics::counter!(
            "engine_repairs_total",
            "accepted" => if accepted { "true" } else { "false" }
        )
        .increment(1);

        RepairAttempt {
            attempt_number,
            input_error_kind: kind,
            original_code: code.to_string(),
            candidate_code: candidate,
            accepted,
        }
    }
}

/// A candidate is usable when it is non-empty and lexically distinct from the
/// code it is meant to replace.
fn usable_candidate(original: &str, candidate: &str) -> bool {
    let candidate = candidate.trim();
    !candidate.is_empty() && candidate != original.trim()
}
