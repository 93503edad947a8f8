// src/pool/slot.rs
//! Container slots and leases
//!
//! A slot is one reusable execution container owned by the pool. Jobs never
//! hold slots; they hold an opaque `LeaseId` that the pool maps back to a
//! slot. All slot-state transitions are serialized inside the pool.

use crate::kernel::language::Language;
use crate::kernel::session::ExecutionSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use ulid::Ulid;

/// Unique identifier of a pool slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(String);

impl SlotId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token granting exclusive, temporary use of one slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// In the pool, ready to be leased
    Idle,
    /// Exclusively leased to one job
    Acquired,
    /// Being discarded and replaced
    Recycling,
}

impl SlotState {
    pub fn can_transition(self, to: SlotState) -> bool {
        matches!(
            (self, to),
            (SlotState::Idle, SlotState::Acquired)
                | (SlotState::Idle, SlotState::Recycling)
                | (SlotState::Acquired, SlotState::Idle)
                | (SlotState::Acquired, SlotState::Recycling)
        )
    }
}

/// Health verdict a releasing job attaches to its lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthHint {
    /// Session is reusable
    Healthy,
    /// Session was interrupted, killed, or otherwise left in an unknown
    /// state; the slot must be recycled, never reused
    Corrupted,
}

/// One pool entry: an isolated execution container and its bookkeeping
pub struct ContainerSlot {
    id: SlotId,
    language: Language,
    session: Arc<dyn ExecutionSession>,
    state: parking_lot::Mutex<SlotState>,
    uses_since_recycle: AtomicU32,
    last_health_check_at: parking_lot::Mutex<DateTime<Utc>>,
    idle_since: parking_lot::Mutex<Instant>,
}

impl ContainerSlot {
    pub fn new(language: Language, session: Arc<dyn ExecutionSession>) -> Self {
        Self {
            id: SlotId::new(),
            language,
            session,
            state: parking_lot::Mutex::new(SlotState::Idle),
            uses_since_recycle: AtomicU32::new(0),
            last_health_check_at: parking_lot::Mutex::new(Utc::now()),
            idle_since: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &SlotId {
        &self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn session(&self) -> Arc<dyn ExecutionSession> {
        Arc::clone(&self.session)
    }

    pub fn state(&self) -> SlotState {
        *self.state.lock()
    }

    /// Move the slot to a new state; panics on an illegal transition, which
    /// would mean the pool's internal serialization is broken.
    pub fn transition(&self, to: SlotState) {
        let mut state = self.state.lock();
        assert!(
            state.can_transition(to),
            "illegal slot transition {:?} -> {:?} for {}",
            *state,
            to,
            self.id
        );
        *state = to;
        if to == SlotState::Idle {
            *self.idle_since.lock() = Instant::now();
        }
    }

    /// Count one acquisition against the recycle threshold
    pub fn record_use(&self) -> u32 {
        self.uses_since_recycle.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn uses_since_recycle(&self) -> u32 {
        self.uses_since_recycle.load(Ordering::Relaxed)
    }

    pub fn touch_health_check(&self) {
        *self.last_health_check_at.lock() = Utc::now();
    }

    pub fn last_health_check_at(&self) -> DateTime<Utc> {
        *self.last_health_check_at.lock()
    }

    pub fn idle_since(&self) -> Instant {
        *self.idle_since.lock()
    }
}

impl std::fmt::Debug for ContainerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSlot")
            .field("id", &self.id)
            .field("language", &self.language)
            .field("state", &self.state())
            .field("uses_since_recycle", &self.uses_since_recycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_ids_are_unique() {
        let a = LeaseId::new();
        let b = LeaseId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_state_transitions() {
        assert!(SlotState::Idle.can_transition(SlotState::Acquired));
        assert!(SlotState::Acquired.can_transition(SlotState::Idle));
        assert!(SlotState::Acquired.can_transition(SlotState::Recycling));
        assert!(SlotState::Idle.can_transition(SlotState::Recycling));

        // Recycling is terminal for a slot; a replacement starts fresh
        assert!(!SlotState::Recycling.can_transition(SlotState::Idle));
        assert!(!SlotState::Recycling.can_transition(SlotState::Acquired));
        assert!(!SlotState::Idle.can_transition(SlotState::Idle));
    }
}
