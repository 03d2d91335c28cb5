//! Session Record Module
//!
//! In-memory representation of one session's persisted state.
//!
//! ## Responsibilities
//! - Hold the session payload and its sliding timeout
//! - Carry the embedded exclusive lock (`locked`, `lock_id`, `lock_date`)
//! - Convert to/from the seven-field hash layout stored in the backend
//!
//! The session id is NOT stored in the record; it is part of the backend key.

mod codec;
mod items;

use chrono::{DateTime, SubsecRound, Utc};

use crate::lock::LockInfo;

pub use codec::{decode, encode, Fields, FIELD_COUNT};
pub use items::{BincodeItemCodec, ItemCodec, SessionItems};

/// Lifecycle marker the consuming layer uses to tell new sessions apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum SessionFlags {
    /// Returning session, nothing special
    #[default]
    None = 0,

    /// Created by `create_uninitialized_item`, not yet written by a request
    InitializeItem = 1,

    /// Session was abandoned by the consuming layer
    Abandoned = 2,
}

impl SessionFlags {
    /// Parse the wire representation; unknown values yield `None`
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(SessionFlags::None),
            1 => Some(SessionFlags::InitializeItem),
            2 => Some(SessionFlags::Abandoned),
            _ => None,
        }
    }
}

/// Current time truncated to the precision the wire format keeps (µs)
pub fn timestamp_now() -> DateTime<Utc> {
    truncate_timestamp(Utc::now())
}

/// Drop sub-microsecond precision
pub fn truncate_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Persisted state of one session
///
/// Timestamps are held at microsecond precision, the precision of the stored
/// record, so every record survives an encode/decode round trip unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Set once when the record is first created
    created: DateTime<Utc>,

    /// True while a writer holds exclusive access
    pub locked: bool,

    /// Current lock acquisition; `0` when unlocked
    pub lock_id: u32,

    /// When the lock was taken; `MIN_UTC` when unlocked
    lock_date: DateTime<Utc>,

    /// Sliding expiration window (minutes) of the last full write
    pub timeout_minutes: u32,

    /// Session payload
    pub items: SessionItems,

    pub flags: SessionFlags,
}

impl SessionRecord {
    /// Sentinel lock id for unlocked records
    pub const NO_LOCK_ID: u32 = 0;

    /// Sentinel lock date for unlocked records
    pub const NO_LOCK_DATE: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

    /// A fresh, unlocked, empty record
    pub fn new(timeout_minutes: u32) -> Self {
        Self {
            created: timestamp_now(),
            locked: false,
            lock_id: Self::NO_LOCK_ID,
            lock_date: Self::NO_LOCK_DATE,
            timeout_minutes,
            items: SessionItems::new(),
            flags: SessionFlags::None,
        }
    }

    /// A fresh record flagged as not yet initialized by the consuming layer
    pub fn uninitialized(timeout_minutes: u32) -> Self {
        Self {
            flags: SessionFlags::InitializeItem,
            ..Self::new(timeout_minutes)
        }
    }

    /// A fresh unlocked record holding the given payload
    pub fn with_items(items: SessionItems, timeout_minutes: u32) -> Self {
        Self {
            items,
            ..Self::new(timeout_minutes)
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Truncated to microseconds
    pub fn set_created(&mut self, created: DateTime<Utc>) {
        self.created = truncate_timestamp(created);
    }

    pub fn lock_date(&self) -> DateTime<Utc> {
        self.lock_date
    }

    /// Truncated to microseconds
    pub fn set_lock_date(&mut self, lock_date: DateTime<Utc>) {
        self.lock_date = truncate_timestamp(lock_date);
    }

    /// Lock id and date, only while locked
    pub fn lock_info(&self) -> Option<LockInfo> {
        self.locked.then(|| LockInfo {
            lock_id: self.lock_id,
            lock_date: self.lock_date,
        })
    }

    /// Drop the lock and reset the lock fields to their sentinels
    pub(crate) fn clear_lock(&mut self) {
        self.locked = false;
        self.lock_id = Self::NO_LOCK_ID;
        self.lock_date = Self::NO_LOCK_DATE;
    }
}
