// src/pool/health.rs
//! Periodic health checking of idle containers
//!
//! A background task probes idle slots with the language no-op on a fixed
//! interval; slots that fail are recycled. The task holds only a weak
//! reference to the pool, so dropping the pool stops it.

use crate::pool::container_pool::PoolCore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Start the health checker for a pool. Returns `None` when the configured
/// interval is zero (checking disabled).
pub(crate) fn spawn_health_checker(core: &Arc<PoolCore>) -> Option<JoinHandle<()>> {
    let interval = core.settings.health_check_interval();
    if interval.is_zero() {
        debug!("health checking disabled");
        return None;
    }

    let weak = Arc::downgrade(core);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh pool is not
        // probed before it has any containers.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(core) = weak.upgrade() else { break };
            if core.state.lock().await.shutting_down {
                break;
            }
            PoolCore::probe_idle_slots(&core).await;
        }
    }))
}
