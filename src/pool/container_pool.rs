// src/pool/container_pool.rs
//! Container pool manager
//!
//! Owns a fixed-capacity set of execution containers and hands out exclusive
//! leases. The pool is an explicitly constructed instance with its own
//! lifecycle (`new`/`shutdown`); jobs interact with it only through opaque
//! lease tokens.
//!
//! # Behavior
//!
//! - `acquire` waits up to the configured timeout for capacity, then picks
//!   the longest-idle slot of the requested language (LRU bounds staleness),
//!   provisioning lazily below capacity
//! - `release` returns healthy slots to the idle pool; corrupted or over-used
//!   slots are recycled on a detached task so release never blocks on
//!   provisioning
//! - a periodic health checker probes idle slots with a no-op execution and
//!   recycles failures

use crate::kernel::language::Language;
use crate::kernel::session::{ExecutionSession, SessionFactory};
use crate::pool::health;
use crate::pool::slot::{ContainerSlot, HealthHint, LeaseId, SlotState};
use crate::utils::config::PoolSettings;
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Budget for one health probe against an idle slot
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before re-checking the idle pool when every slot is momentarily
/// accounted for (e.g. held by the health checker)
const ACQUIRE_RETRY_PAUSE: Duration = Duration::from_millis(5);

pub(crate) struct PoolState {
    pub(crate) idle: VecDeque<Arc<ContainerSlot>>,
    pub(crate) total: usize,
    pub(crate) shutting_down: bool,
}

/// Shared pool internals; detached recycle tasks and the health checker hold
/// their own references.
pub(crate) struct PoolCore {
    pub(crate) settings: PoolSettings,
    factory: Arc<dyn SessionFactory>,
    pub(crate) state: Mutex<PoolState>,
    leases: DashMap<LeaseId, Arc<ContainerSlot>>,
    permits: Semaphore,
}

impl PoolCore {
    async fn provision(&self, language: Language) -> Result<Arc<ContainerSlot>> {
        debug!(%language, "provisioning container");
        let session = self.factory.provision(language).await?;
        Ok(Arc::new(ContainerSlot::new(language, session)))
    }

    /// Discard a slot and eagerly provision a replacement, all on a detached
    /// task. `return_permit` is false for slots that were idle (idle slots do
    /// not hold capacity permits).
    pub(crate) fn retire(core: &Arc<PoolCore>, slot: Arc<ContainerSlot>, return_permit: bool) {
        if slot.state() != SlotState::Recycling {
            slot.transition(SlotState::Recycling);
        }
        let core = Arc::clone(core);
        tokio::spawn(async move {
            metrics::counter!("engine_pool_recycles_total").increment(1);
            debug!(slot = %slot.id(), "discarding container");
            slot.session().shutdown().await;

            core.state.lock().await.total -= 1;
            if return_permit {
                core.permits.add_permits(1);
            }

            // Keep the pool warm; if this fails the next acquire provisions
            // lazily instead.
            let language = slot.language();
            let reserved = {
                let mut state = core.state.lock().await;
                if !state.shutting_down && state.total < core.settings.capacity {
                    state.total += 1;
                    true
                } else {
                    false
                }
            };
            if reserved {
                match core.provision(language).await {
                    Ok(fresh) => core.state.lock().await.idle.push_back(fresh),
                    Err(e) => {
                        warn!(%language, "replacement provisioning failed: {e}");
                        core.state.lock().await.total -= 1;
                    }
                }
            }
        });
    }

    /// Probe every currently idle slot with the language no-op; failures are
    /// recycled. Slots are taken out one at a time so acquires interleave.
    pub(crate) async fn probe_idle_slots(core: &Arc<PoolCore>) {
        let count = core.state.lock().await.idle.len();
        for _ in 0..count {
            let slot = match core.state.lock().await.idle.pop_front() {
                Some(slot) => slot,
                None => break,
            };
            match slot.session().probe(PROBE_TIMEOUT).await {
                Ok(()) => {
                    slot.touch_health_check();
                    core.state.lock().await.idle.push_back(slot);
                }
                Err(e) => {
                    warn!(slot = %slot.id(), "idle container failed health probe: {e}");
                    PoolCore::retire(core, slot, false);
                }
            }
        }
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub capacity: usize,
    pub total_slots: usize,
    pub idle_slots: usize,
    pub leased_slots: usize,
}

/// Fixed-capacity pool of isolated execution containers
pub struct ContainerPool {
    core: Arc<PoolCore>,
    health_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ContainerPool {
    /// Create a pool. Containers are provisioned on demand up to
    /// `settings.capacity`; use [`prewarm`](Self::prewarm) to provision ahead
    /// of the first cycle.
    pub fn new(settings: PoolSettings, factory: Arc<dyn SessionFactory>) -> Self {
        info!(capacity = settings.capacity, "initializing container pool");

        let core = Arc::new(PoolCore {
            permits: Semaphore::new(settings.capacity),
            settings,
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                shutting_down: false,
            }),
            leases: DashMap::new(),
        });

        let health_task = health::spawn_health_checker(&core);

        Self {
            core,
            health_task: parking_lot::Mutex::new(health_task),
        }
    }

    /// Provision up to `count` containers for `language` ahead of demand.
    /// Returns how many were actually created (bounded by capacity).
    pub async fn prewarm(&self, language: Language, count: usize) -> Result<usize> {
        let mut created = 0;
        for _ in 0..count {
            let reserved = {
                let mut state = self.core.state.lock().await;
                if state.shutting_down || state.total >= self.core.settings.capacity {
                    false
                } else {
                    state.total += 1;
                    true
                }
            };
            if !reserved {
                break;
            }
            match self.core.provision(language).await {
                Ok(slot) => {
                    self.core.state.lock().await.idle.push_back(slot);
                    created += 1;
                }
                Err(e) => {
                    self.core.state.lock().await.total -= 1;
                    return Err(e);
                }
            }
        }
        debug!(%language, created, "prewarmed containers");
        Ok(created)
    }

    /// Acquire an exclusive lease on a container for `language`.
    ///
    /// Blocks up to the configured acquire timeout when the pool is at
    /// capacity, then fails with `PoolExhausted`. Provisioning failures
    /// surface as distinct infrastructure errors.
    pub async fn acquire(&self, language: Language) -> Result<LeaseId> {
        let core = &self.core;
        if core.state.lock().await.shutting_down {
            return Err(EngineError::ShuttingDown);
        }

        let wait = core.settings.acquire_timeout();
        let permit = match tokio::time::timeout(wait, core.permits.acquire()).await {
            Err(_) => {
                warn!(?wait, "no container became available in time");
                return Err(EngineError::PoolExhausted(wait));
            }
            Ok(Err(_)) => return Err(EngineError::ShuttingDown),
            Ok(Ok(permit)) => permit,
        };

        let slot = loop {
            let mut state = core.state.lock().await;
            if state.shutting_down {
                return Err(EngineError::ShuttingDown);
            }

            // Longest-idle matching slot; the deque front is least recently
            // used, which bounds per-slot staleness.
            if let Some(pos) = state.idle.iter().position(|s| s.language() == language) {
                break state.idle.remove(pos).expect("position is in bounds");
            }

            if state.total < core.settings.capacity {
                state.total += 1;
                drop(state);
                match core.provision(language).await {
                    Ok(slot) => break slot,
                    Err(e) => {
                        core.state.lock().await.total -= 1;
                        return Err(e);
                    }
                }
            }

            // At capacity with no matching idle slot: replace the longest-idle
            // slot of another language. Capacity bounds containers, not
            // per-language quotas.
            if let Some(victim) = state.idle.pop_front() {
                drop(state);
                debug!(victim = %victim.id(), from = %victim.language(), to = %language,
                       "replacing idle container for language mismatch");
                victim.transition(SlotState::Recycling);
                victim.session().shutdown().await;
                match core.provision(language).await {
                    Ok(slot) => break slot,
                    Err(e) => {
                        core.state.lock().await.total -= 1;
                        return Err(e);
                    }
                }
            }

            // Holding a permit guarantees a slot is (or is about to be)
            // available; it is momentarily out of the idle pool.
            drop(state);
            tokio::time::sleep(ACQUIRE_RETRY_PAUSE).await;
        };

        slot.transition(SlotState::Acquired);
        let uses = slot.record_use();
        let lease = LeaseId::new();
        core.leases.insert(lease.clone(), slot);
        permit.forget();

        metrics::counter!("engine_pool_acquisitions_total").increment(1);
        debug!(%lease, uses, "container lease issued");
        Ok(lease)
    }

    /// Release a lease. Healthy slots under the use threshold return to the
    /// idle pool; anything else is recycled fire-and-forget.
    pub async fn release(&self, lease: LeaseId, hint: HealthHint) {
        let Some((_, slot)) = self.core.leases.remove(&lease) else {
            warn!(%lease, "release of unknown lease ignored");
            return;
        };

        let overused = slot.uses_since_recycle() >= self.core.settings.max_uses_per_slot;
        if hint == HealthHint::Corrupted || overused {
            debug!(slot = %slot.id(), ?hint, overused, "released container goes to recycle");
            PoolCore::retire(&self.core, slot, true);
        } else {
            slot.transition(SlotState::Idle);
            self.core.state.lock().await.idle.push_back(slot);
            self.core.permits.add_permits(1);
            debug!(%lease, "container lease released");
        }
    }

    /// Forcibly discard and replace the slot behind a lease
    pub async fn recycle(&self, lease: LeaseId) {
        let Some((_, slot)) = self.core.leases.remove(&lease) else {
            warn!(%lease, "recycle of unknown lease ignored");
            return;
        };
        debug!(slot = %slot.id(), "forced recycle");
        PoolCore::retire(&self.core, slot, true);
    }

    /// Resolve a lease to its session. Fails for unknown (already released)
    /// leases.
    pub fn session(&self, lease: &LeaseId) -> Result<Arc<dyn ExecutionSession>> {
        self.core
            .leases
            .get(lease)
            .map(|entry| entry.value().session())
            .ok_or_else(|| EngineError::UnknownLease(lease.to_string()))
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.core.state.lock().await;
        PoolStats {
            capacity: self.core.settings.capacity,
            total_slots: state.total,
            idle_slots: state.idle.len(),
            leased_slots: self.core.leases.len(),
        }
    }

    /// Tear down every container and stop handing out leases. Outstanding
    /// leases are forcibly terminated.
    pub async fn shutdown(&self) {
        info!("shutting down container pool");

        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
        self.core.permits.close();

        let idle = {
            let mut state = self.core.state.lock().await;
            state.shutting_down = true;
            std::mem::take(&mut state.idle)
        };
        for slot in idle {
            slot.transition(SlotState::Recycling);
            slot.session().shutdown().await;
        }

        let outstanding: Vec<LeaseId> = self
            .core
            .leases
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for lease in outstanding {
            if let Some((_, slot)) = self.core.leases.remove(&lease) {
                warn!(%lease, "terminating outstanding lease at shutdown");
                slot.session().shutdown().await;
            }
        }

        self.core.state.lock().await.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedFactory, ScriptedSession};
    use std::sync::Arc;

    fn settings(capacity: usize) -> PoolSettings {
        PoolSettings {
            capacity,
            max_uses_per_slot: 100,
            acquire_timeout_ms: 200,
            health_check_interval_ms: 0, // checker disabled unless a test wants it
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_acquire_and_release_roundtrip() {
        let factory = Arc::new(ScriptedFactory::new());
        let pool = ContainerPool::new(settings(2), factory.clone());

        let lease = pool.acquire(Language::Python).await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.leased_slots, 1);
        assert_eq!(stats.idle_slots, 0);

        pool.release(lease, HealthHint::Healthy).await;
        let stats = pool.stats().await;
        assert_eq!(stats.leased_slots, 0);
        assert_eq!(stats.idle_slots, 1);
    }

    #[tokio::test]
    async fn test_concurrent_leases_map_to_distinct_slots() {
        let factory = Arc::new(ScriptedFactory::new());
        let pool = ContainerPool::new(settings(2), factory.clone());

        let a = pool.acquire(Language::Python).await.unwrap();
        let b = pool.acquire(Language::Python).await.unwrap();

        let session_a = pool.session(&a).unwrap();
        let session_b = pool.session(&b).unwrap();
        assert!(!Arc::ptr_eq(&session_a, &session_b));

        // Released slot is reused by the next acquire
        pool.release(a, HealthHint::Healthy).await;
        let c = pool.acquire(Language::Python).await.unwrap();
        let session_c = pool.session(&c).unwrap();
        assert!(Arc::ptr_eq(&session_a, &session_c));

        pool.release(b, HealthHint::Healthy).await;
        pool.release(c, HealthHint::Healthy).await;
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let factory = Arc::new(ScriptedFactory::new());
        let pool = ContainerPool::new(settings(1), factory.clone());

        let held = pool.acquire(Language::Python).await.unwrap();
        let result = pool.acquire(Language::Python).await;
        assert!(matches!(result, Err(EngineError::PoolExhausted(_))));

        pool.release(held, HealthHint::Healthy).await;
        assert!(pool.acquire(Language::Python).await.is_ok());
    }

    #[tokio::test]
    async fn test_blocked_acquire_proceeds_on_release() {
        let factory = Arc::new(ScriptedFactory::new());
        let pool = Arc::new(ContainerPool::new(settings(1), factory.clone()));

        let held = pool.acquire(Language::Python).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(Language::Python).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.release(held, HealthHint::Healthy).await;

        let lease = waiter.await.unwrap().unwrap();
        pool.release(lease, HealthHint::Healthy).await;
    }

    #[tokio::test]
    async fn test_unhealthy_release_recycles_slot() {
        let factory = Arc::new(ScriptedFactory::new());
        let pool = ContainerPool::new(settings(1), factory.clone());

        let lease = pool.acquire(Language::Python).await.unwrap();
        let first = pool.session(&lease).unwrap();
        pool.release(lease, HealthHint::Corrupted).await;

        // Recycle is asynchronous; the corrupted session must be torn down
        wait_until(|| factory.sessions()[0].is_shut_down()).await;

        let lease = pool.acquire(Language::Python).await.unwrap();
        let second = pool.session(&lease).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        pool.release(lease, HealthHint::Healthy).await;
    }

    #[tokio::test]
    async fn test_max_uses_triggers_recycle() {
        let factory = Arc::new(ScriptedFactory::new());
        let mut cfg = settings(1);
        cfg.max_uses_per_slot = 2;
        let pool = ContainerPool::new(cfg, factory.clone());

        let lease = pool.acquire(Language::Python).await.unwrap();
        pool.release(lease, HealthHint::Healthy).await;
        let lease = pool.acquire(Language::Python).await.unwrap();
        pool.release(lease, HealthHint::Healthy).await;

        // Two uses reached the threshold; the slot must have been retired
        wait_until(|| factory.sessions()[0].is_shut_down()).await;

        let lease = pool.acquire(Language::Python).await.unwrap();
        let fresh = pool.session(&lease).unwrap();
        let retired: Arc<dyn ExecutionSession> = factory.sessions()[0].clone();
        assert!(!Arc::ptr_eq(&retired, &fresh));
        pool.release(lease, HealthHint::Healthy).await;
    }

    #[tokio::test]
    async fn test_provision_failure_is_distinct_from_exhaustion() {
        let factory = Arc::new(ScriptedFactory::new());
        factory.fail_next_provisions(1);
        let pool = ContainerPool::new(settings(1), factory.clone());

        let result = pool.acquire(Language::Python).await;
        assert!(matches!(result, Err(EngineError::Provision(_))));

        // The failed acquire returned its capacity; the pool still works
        let lease = pool.acquire(Language::Python).await.unwrap();
        pool.release(lease, HealthHint::Healthy).await;
    }

    #[tokio::test]
    async fn test_language_mismatch_replaces_longest_idle_slot() {
        let factory = Arc::new(ScriptedFactory::new());
        let pool = ContainerPool::new(settings(1), factory.clone());

        let lease = pool.acquire(Language::Python).await.unwrap();
        pool.release(lease, HealthHint::Healthy).await;

        let lease = pool.acquire(Language::Node).await.unwrap();
        let session = pool.session(&lease).unwrap();
        assert_eq!(session.language(), Language::Node);
        assert_eq!(pool.stats().await.total_slots, 1);
        pool.release(lease, HealthHint::Healthy).await;
    }

    #[tokio::test]
    async fn test_health_checker_recycles_failing_idle_slot() {
        let factory = Arc::new(ScriptedFactory::new());
        let mut cfg = settings(2);
        cfg.health_check_interval_ms = 20;
        let pool = ContainerPool::new(cfg, factory.clone());

        pool.prewarm(Language::Python, 1).await.unwrap();
        factory.sessions()[0].fail_probes();

        wait_until(|| factory.sessions()[0].is_shut_down()).await;

        // A replacement was provisioned in its place
        wait_until(|| factory.sessions().len() >= 2).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_prewarm_respects_capacity() {
        let factory = Arc::new(ScriptedFactory::new());
        let pool = ContainerPool::new(settings(2), factory.clone());

        let created = pool.prewarm(Language::Python, 5).await.unwrap();
        assert_eq!(created, 2);
        assert_eq!(pool.stats().await.idle_slots, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_leasing() {
        let factory = Arc::new(ScriptedFactory::new());
        let pool = ContainerPool::new(settings(2), factory.clone());

        let lease = pool.acquire(Language::Python).await.unwrap();
        pool.shutdown().await;

        assert!(matches!(
            pool.acquire(Language::Python).await,
            Err(EngineError::ShuttingDown)
        ));
        // The outstanding lease's session was terminated
        assert!(factory.sessions()[0].is_shut_down());
        drop(lease);
    }

    #[tokio::test]
    async fn test_scripted_session_default_is_healthy() {
        // Guards the test double itself: a fresh scripted session executes
        // cleanly, so pool tests above exercise pool logic, not stub quirks.
        let session = ScriptedSession::healthy(Language::Python);
        let outcome = session
            .execute("noop", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.error.is_none());
    }
}
