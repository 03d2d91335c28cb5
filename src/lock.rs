//! Distributed lock protocol
//!
//! Mutual exclusion over one session record, built only from conditional
//! read-modify-write transactions on the record's hash.
//!
//! ## States
//! ```text
//!              acquire (lock_id + 1, lock_date = now)
//!   Unlocked ──────────────────────────────────────▶ Locked(id, date)
//!      ▲                                               │    │
//!      │            release (matching id)              │    │ age > lock timeout:
//!      └───────────────────────────────────────────────┘    │ steal (id + 1, now)
//!                                                           ▼
//!                                                   Locked(id + 1, now)
//! ```
//!
//! The functions here only decide; the engine runs them inside backend
//! transactions so a concurrent acquirer racing the same transition fails
//! to commit and has to retry.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::record::SessionRecord;

/// Ownership of a held lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockInfo {
    pub lock_id: u32,
    pub lock_date: DateTime<Utc>,
}

impl LockInfo {
    /// Time since the lock was taken; zero if the clock moved backwards
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.lock_date).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the holder is presumed dead
    pub fn is_stale(&self, now: DateTime<Utc>, lock_timeout: Duration) -> bool {
        self.age(now) > lock_timeout
    }
}

/// Outcome of one acquisition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireAttempt {
    /// Record was unlocked; this is the locked version to write back
    Acquired(SessionRecord),

    /// Record held an abandoned lock; this is the re-locked version
    Stolen {
        record: SessionRecord,
        previous: LockInfo,
    },

    /// Someone else holds a live lock
    Held(LockInfo),
}

/// Decide whether `record` can be locked at `now`
pub fn try_acquire(record: &SessionRecord, now: DateTime<Utc>, lock_timeout: Duration) -> AcquireAttempt {
    match record.lock_info() {
        None => AcquireAttempt::Acquired(lock(record, now)),
        Some(held) if held.is_stale(now, lock_timeout) => AcquireAttempt::Stolen {
            record: lock(record, now),
            previous: held,
        },
        Some(held) => AcquireAttempt::Held(held),
    }
}

/// Unlocked copy of `record` if `lock_id` owns its lock
///
/// `None` means the release is a no-op: the record is unlocked already or
/// the lock belongs to another acquisition.
pub fn release(record: &SessionRecord, lock_id: u32) -> Option<SessionRecord> {
    match record.lock_info() {
        Some(held) if held.lock_id == lock_id => {
            let mut released = record.clone();
            released.clear_lock();
            Some(released)
        }
        _ => None,
    }
}

/// Whether `lock_id` currently owns the record's lock
pub fn is_held_by(record: &SessionRecord, lock_id: u32) -> bool {
    record.lock_info().is_some_and(|held| held.lock_id == lock_id)
}

fn lock(record: &SessionRecord, now: DateTime<Utc>) -> SessionRecord {
    let mut locked = record.clone();
    locked.locked = true;
    // 0 is reserved for "no lock"
    locked.lock_id = match record.lock_id.wrapping_add(1) {
        SessionRecord::NO_LOCK_ID => 1,
        next => next,
    };
    locked.set_lock_date(now);
    locked
}
