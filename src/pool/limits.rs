// src/pool/limits.rs
//! Resource limits for execution containers
//!
//! A validated, serde-configurable profile plus the cgroup enforcer that
//! applies it to provisioned interpreter processes. Enforcement is
//! best-effort: when the cgroup filesystem is unavailable (containers,
//! non-Linux hosts) the engine runs without hard limits and says so once in
//! the log.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Resource limit profile for one container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU quota as a percentage of one core (100 = a full core)
    pub cpu_quota_percent: Option<u32>,

    /// Memory ceiling in megabytes
    pub memory_limit_mb: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_quota_percent: Some(100),
            memory_limit_mb: Some(1024),
        }
    }
}

impl ResourceLimits {
    /// No restrictions
    pub fn unlimited() -> Self {
        Self {
            cpu_quota_percent: None,
            memory_limit_mb: None,
        }
    }

    /// Tight limits for untrusted code
    pub fn strict() -> Self {
        Self {
            cpu_quota_percent: Some(25),
            memory_limit_mb: Some(256),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(quota) = self.cpu_quota_percent {
            if quota == 0 {
                return Err("cpu_quota_percent cannot be 0".into());
            }
            if quota > 400 {
                return Err("cpu_quota_percent cannot exceed 400 (4 cores)".into());
            }
        }
        if let Some(memory) = self.memory_limit_mb {
            if memory < 64 {
                return Err("memory_limit_mb cannot be less than 64".into());
            }
            if memory > 16_384 {
                return Err("memory_limit_mb cannot exceed 16384 (16GB)".into());
            }
        }
        Ok(())
    }
}

/// Applies a `ResourceLimits` profile to processes via cgroups
#[derive(Debug, Clone)]
pub struct CgroupLimiter {
    limits: ResourceLimits,
}

impl CgroupLimiter {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Apply the profile to `pid`. Best-effort: failures are logged, never
    /// fatal, so the engine keeps working on hosts without cgroup access.
    pub fn apply(&self, pid: u32) {
        #[cfg(target_os = "linux")]
        {
            debug!(pid, limits = ?self.limits, "applying resource limits");

            if let Some(quota) = self.limits.cpu_quota_percent {
                // quota/period in microseconds; period fixed at 100ms
                let period: u64 = 100_000;
                let quota_us = (u64::from(quota) * period) / 100;
                enter_cgroup(
                    "cpu",
                    pid,
                    &[
                        ("cpu.cfs_period_us", period.to_string()),
                        ("cpu.cfs_quota_us", quota_us.to_string()),
                    ],
                );
            }

            if let Some(memory_mb) = self.limits.memory_limit_mb {
                let bytes = memory_mb * 1024 * 1024;
                enter_cgroup("memory", pid, &[("memory.limit_in_bytes", bytes.to_string())]);
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = pid;
            warn!("cgroup resource limits unsupported on this platform");
        }
    }

    /// Remove the cgroups created for `pid`
    pub fn cleanup(&self, pid: u32) {
        #[cfg(target_os = "linux")]
        {
            debug!(pid, "cleaning up cgroups");
            for controller in ["cpu", "memory"] {
                let _ = std::fs::remove_dir_all(cgroup_dir(controller, pid));
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = pid;
        }
    }
}

#[cfg(target_os = "linux")]
fn cgroup_dir(controller: &str, pid: u32) -> String {
    format!("/sys/fs/cgroup/{controller}/helix-lab-{pid}")
}

/// Create a per-process cgroup, write its limit files, and move the process
/// into it. Any step failing aborts the controller with a warning.
#[cfg(target_os = "linux")]
fn enter_cgroup(controller: &str, pid: u32, files: &[(&str, String)]) {
    use std::fs;

    let dir = cgroup_dir(controller, pid);
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!(pid, controller, "cannot create cgroup: {e}");
        return;
    }

    for (name, value) in files {
        if let Err(e) = fs::write(format!("{dir}/{name}"), value) {
            warn!(pid, controller, file = name, "cannot write cgroup limit: {e}");
            return;
        }
    }

    if let Err(e) = fs::write(format!("{dir}/cgroup.procs"), pid.to_string()) {
        warn!(pid, controller, "cannot attach process to cgroup: {e}");
    }
}
