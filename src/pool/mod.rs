// src/pool/mod.rs
//! Container pool management
//!
//! - **Container Pool**: fixed-capacity slot set, exclusive leases, LRU
//!   acquisition, fire-and-forget recycling
//! - **Slots & Leases**: slot state machine and the opaque lease tokens jobs
//!   hold instead of slots
//! - **Limits**: resource limit profiles and cgroup enforcement
//! - **Health**: periodic no-op probing of idle containers

pub mod container_pool;
mod health;
pub mod limits;
pub mod slot;

pub use container_pool::{ContainerPool, PoolStats};
pub use limits::{CgroupLimiter, ResourceLimits};
pub use slot::{ContainerSlot, HealthHint, LeaseId, SlotId, SlotState};
