// src/lib.rs
//! Helix Lab Execution Engine
//!
//! Concurrent code-execution core for autonomous research agents: per cycle,
//! a reviewed plan's approved analyses become executed, verified code runs.
//!
//! # Architecture
//!
//! - **scheduler**: bounded-lane job scheduling, retry state machine, cycle
//!   deadlines with partial results
//! - **pool**: fixed-capacity container pool with exclusive leases, LRU
//!   acquisition, health checking, and fire-and-forget recycling
//! - **kernel**: persistent interpreter sessions and deadline-enforced
//!   execution of code blocks
//! - **recovery**: failure classification and the bounded, LLM-assisted
//!   repair loop
//! - **observability**: tracing and metrics initialization
//! - **utils**: error taxonomy and configuration
//!
//! The engine is an in-process library: the embedding application supplies
//! tasks and a [`CodeRepairer`] implementation and gets back one terminal
//! [`TaskReport`] per task.
//!
//! ```no_run
//! use std::sync::Arc;
//! use helix_lab_engine::{
//!     ContainerPool, CycleScheduler, EngineConfig, InterpreterFactory, Language, Task,
//! };
//! # use helix_lab_engine::{CodeRepairer, ErrorKind, ExecutionError};
//! # struct NoRepair;
//! # #[async_trait::async_trait]
//! # impl CodeRepairer for NoRepair {
//! #     async fn propose_fix(&self, _: &str, _: ErrorKind, _: &ExecutionError)
//! #         -> anyhow::Result<Option<String>> { Ok(None) }
//! # }
//!
//! # async fn example() -> helix_lab_engine::Result<()> {
//! let config = EngineConfig::load()?;
//! let factory = Arc::new(InterpreterFactory::new(config.limits.clone()));
//! let pool = Arc::new(ContainerPool::new(config.pool.clone(), factory));
//! let scheduler = CycleScheduler::new(Arc::clone(&pool), Arc::new(NoRepair), &config);
//!
//! let tasks = vec![Task::new("cycle-1", "6 * 7", Language::Python)];
//! let report = scheduler.run_cycle(tasks).await;
//! assert_eq!(report.results.len(), 1);
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod kernel;
pub mod observability;
pub mod pool;
pub mod recovery;
pub mod scheduler;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use kernel::language::Language;
pub use kernel::outcome::{ExecutionError, ExecutionResult};
pub use kernel::session::{ExecutionSession, InterpreterFactory, SessionFactory};
pub use kernel::KernelClient;
pub use pool::container_pool::{ContainerPool, PoolStats};
pub use pool::limits::ResourceLimits;
pub use pool::slot::{HealthHint, LeaseId};
pub use recovery::classifier::ErrorKind;
pub use recovery::repair::{CodeRepairer, RepairAttempt};
pub use scheduler::cycle::{CycleReport, CycleScheduler};
pub use scheduler::job::{JobStatus, TaskReport};
pub use scheduler::task::{Task, TaskId};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
