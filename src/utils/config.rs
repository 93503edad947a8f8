// src/utils/config.rs
//! Engine configuration
//!
//! Layered loading: built-in defaults, then an optional `helix-lab` config
//! file (TOML/YAML/JSON), then environment variables with the `HELIX_LAB`
//! prefix (`HELIX_LAB__POOL__CAPACITY=8`).

use crate::pool::limits::ResourceLimits;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Container pool settings
    pub pool: PoolSettings,

    /// Per-execution settings
    pub execution: ExecutionSettings,

    /// Cycle scheduler settings
    pub scheduler: SchedulerSettings,

    /// Resource limit profile applied to provisioned containers
    pub limits: ResourceLimits,
}

/// Container pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Total container slots (>= 1)
    pub capacity: usize,

    /// Acquisitions a slot serves before it is recycled regardless of health
    pub max_uses_per_slot: u32,

    /// How long an acquire waits for an idle slot before `PoolExhausted`
    pub acquire_timeout_ms: u64,

    /// Interval between idle-slot health probes
    pub health_check_interval_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: 4,
            max_uses_per_slot: 32,
            acquire_timeout_ms: 30_000,
            health_check_interval_ms: 60_000,
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// Per-execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Wall-clock budget for one run attempt when the task does not set one
    pub default_timeout_ms: u64,

    /// Attempt ceiling for tasks that do not set their own
    pub max_attempts_default: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 120_000,
            max_attempts_default: 3,
        }
    }
}

impl ExecutionSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Cycle scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Number of parallel execution lanes (>= 1)
    pub concurrency_limit: usize,

    /// Wall-clock budget for a whole cycle
    pub cycle_deadline_ms: u64,

    /// Pause before a re-attempt (timeout retry or post-repair resubmit)
    pub retry_backoff_ms: u64,

    /// Uniform jitter added on top of the backoff
    pub retry_backoff_jitter_ms: u64,

    /// Sub-timeout applied to the external code-repair collaborator
    pub repair_timeout_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            cycle_deadline_ms: 3_600_000,
            retry_backoff_ms: 500,
            retry_backoff_jitter_ms: 250,
            repair_timeout_ms: 60_000,
        }
    }
}

impl SchedulerSettings {
    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_millis(self.cycle_deadline_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_backoff_jitter(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_jitter_ms)
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_millis(self.repair_timeout_ms)
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional config file, and the
    /// environment.
    pub fn load() -> Result<Self> {
        let cfg: EngineConfig = ::config::Config::builder()
            .add_source(::config::File::with_name("helix-lab").required(false))
            .add_source(::config::Environment::with_prefix("HELIX_LAB").separator("__"))
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.pool.capacity == 0 {
            return Err(EngineError::Config("pool.capacity must be >= 1".into()));
        }
        if self.scheduler.concurrency_limit == 0 {
            return Err(EngineError::Config(
                "scheduler.concurrency_limit must be >= 1".into(),
            ));
        }
        if self.execution.max_attempts_default == 0 {
            return Err(EngineError::Config(
                "execution.max_attempts_default must be >= 1".into(),
            ));
        }
        self.limits
            .validate()
            .map_err(|e| EngineError::Config(format!("limits: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.pool.capacity, 4);
        assert_eq!(cfg.scheduler.concurrency_limit, 2);
        assert_eq!(cfg.execution.max_attempts_default, 3);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.pool.capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.pool.acquire_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.scheduler.retry_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"pool": {"capacity": 8}}"#).unwrap();
        assert_eq!(cfg.pool.capacity, 8);
        // Unspecified sections keep their defaults
        assert_eq!(cfg.pool.max_uses_per_slot, 32);
        assert_eq!(cfg.scheduler.concurrency_limit, 2);
    }

    #[test]
    fn test_load_from_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helix-lab.toml");
        std::fs::write(
            &path,
            "[pool]\ncapacity = 9\n\n[scheduler]\nconcurrency_limit = 3\n",
        )
        .unwrap();

        let cfg: EngineConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.pool.capacity, 9);
        assert_eq!(cfg.scheduler.concurrency_limit, 3);
        assert_eq!(cfg.execution.max_attempts_default, 3);
    }
}
