// src/observability/mod.rs
//! Tracing and metrics initialization
//!
//! The engine emits structured logs through `tracing` and counters/histograms
//! through the `metrics` facade. Embedding applications install whichever
//! exporter they want; these entry points only wire up the subscriber and
//! register metric descriptions. Both are idempotent.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static METRICS_INIT: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber.
///
/// Filtering comes from `RUST_LOG` (default `info`). Set `HELIX_LAB_LOG_JSON=1`
/// for JSON-formatted output.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let json = std::env::var("HELIX_LAB_LOG_JSON")
            .map(|v| v == "1")
            .unwrap_or(false);

        if json {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    });
}

/// Register metric descriptions on the `metrics` facade
pub fn init_metrics() {
    METRICS_INIT.get_or_init(|| {
        metrics::describe_counter!(
            "engine_pool_acquisitions_total",
            "Container leases handed out"
        );
        metrics::describe_counter!(
            "engine_pool_recycles_total",
            "Container slots discarded and replaced"
        );
        metrics::describe_counter!(
            "engine_attempts_total",
            "Execution attempts, labeled by outcome kind"
        );
        metrics::describe_counter!(
            "engine_repairs_total",
            "Repair candidates requested, labeled by acceptance"
        );
        metrics::describe_histogram!(
            "engine_attempt_duration_seconds",
            "Wall-clock duration of one execution attempt"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        init_metrics();
        init_metrics();
    }
}
