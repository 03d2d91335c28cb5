//! Session store contract
//!
//! The lifecycle operations a request-handling layer calls once per request.
//! Host frameworks bind to this trait through their own thin adapters.

use std::time::Duration;

use crate::error::Result;
use crate::record::{SessionFlags, SessionItems};

/// Payload handed to and returned from the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub items: SessionItems,

    /// Sliding expiration (minutes) to apply when this data is written
    pub timeout_minutes: u32,
}

impl SessionData {
    pub fn new(items: SessionItems, timeout_minutes: u32) -> Self {
        Self {
            items,
            timeout_minutes,
        }
    }
}

/// Result of a (possibly exclusive) read
#[derive(Debug, Clone, PartialEq)]
pub enum ItemLookup {
    /// Session exists and was readable
    Found {
        data: SessionData,
        flags: SessionFlags,
        /// Set only for exclusive reads: the lock now owned by the caller
        lock_id: Option<u32>,
    },

    /// No (complete) record for this session id
    NotFound,

    /// Another caller holds the lock
    Locked { lock_age: Duration, lock_id: u32 },
}

impl ItemLookup {
    pub fn is_found(&self) -> bool {
        matches!(self, ItemLookup::Found { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, ItemLookup::Locked { .. })
    }

    pub fn data(&self) -> Option<&SessionData> {
        match self {
            ItemLookup::Found { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Lock id owned by the caller (exclusive read) or by the current holder
    pub fn lock_id(&self) -> Option<u32> {
        match self {
            ItemLookup::Found { lock_id, .. } => *lock_id,
            ItemLookup::Locked { lock_id, .. } => Some(*lock_id),
            ItemLookup::NotFound => None,
        }
    }

    /// Flags of a found session; `SessionFlags::None` otherwise
    pub fn flags(&self) -> SessionFlags {
        match self {
            ItemLookup::Found { flags, .. } => *flags,
            _ => SessionFlags::None,
        }
    }
}

/// Called with the session id and its last data when a session expires
pub type ExpireCallback = Box<dyn Fn(&str, &SessionData) + Send + Sync>;

/// Session lifecycle operations
///
/// Lock contention, missing sessions and lock id mismatches are ordinary
/// outcomes, never errors. Errors mean the backend could not be reached or
/// a stored payload could not be decoded.
pub trait SessionStore: Send + Sync {
    /// Empty in-memory data for a brand-new session; touches nothing
    fn create_new_store_data(&self, timeout_minutes: u32) -> SessionData {
        SessionData::new(SessionItems::new(), timeout_minutes)
    }

    /// Unconditionally write an empty, unlocked record flagged `InitializeItem`
    fn create_uninitialized_item(&self, session_id: &str, timeout_minutes: u32) -> Result<()>;

    /// Non-exclusive read; slides the expiration on success
    fn get_item(&self, session_id: &str) -> Result<ItemLookup>;

    /// Read and lock; slides the expiration on success
    fn get_item_exclusive(&self, session_id: &str) -> Result<ItemLookup>;

    /// Write `data` and release the lock held as `lock_id`
    ///
    /// With `new_item` the record is overwritten unconditionally.
    fn set_and_release_item_exclusive(
        &self,
        session_id: &str,
        data: &SessionData,
        lock_id: Option<u32>,
        new_item: bool,
    ) -> Result<()>;

    /// Release the lock held as `lock_id` without touching the payload
    fn release_item_exclusive(&self, session_id: &str, lock_id: u32) -> Result<()>;

    /// Delete the session if `lock_id` holds its lock
    fn remove_item(&self, session_id: &str, lock_id: u32) -> Result<()>;

    /// Slide the expiration to the configured default timeout
    fn reset_item_timeout(&self, session_id: &str) -> Result<()>;

    /// Expiration callbacks are not supported; always returns `false`
    fn set_item_expire_callback(&self, callback: ExpireCallback) -> bool;
}
