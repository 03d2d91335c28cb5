//! Backend Module
//!
//! The hash-structured key-value store the session records live in.
//!
//! ## Responsibilities
//! - Whole-hash reads (`HGETALL` style)
//! - Atomic batches of writes / expirations / deletes
//! - Optimistic transactions: read a key, decide, and commit only if the
//!   key did not change in between (`WATCH` / `MULTI` / `EXEC` style)
//! - Process-wide connection lifecycle (`shutdown`)
//!
//! ## Implementations
//! - [`RedisBackend`]: networked Redis, pooled or basic client mode
//! - [`MemoryBackend`]: in-process map with TTLs, for tests and single-node use

mod memory;
mod redis_backend;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::record::Fields;

pub use self::memory::MemoryBackend;
pub use self::redis_backend::RedisBackend;

/// One write applied to a single key
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Set the given hash fields (other fields are left untouched)
    SetFields(Fields),

    /// Set the key's time to live
    Expire(Duration),

    /// Remove the key entirely
    Delete,
}

/// Result of an optimistic transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// The planned mutations were applied (or there were none)
    Committed,

    /// The key changed after it was read; nothing was applied
    Conflict,
}

/// Decides which mutations to apply after seeing the current fields
///
/// Receives an empty map when the key does not exist.
pub type TxPlan<'a> = dyn FnMut(&Fields) -> Result<Vec<Mutation>> + 'a;

/// Hash key-value store with atomic per-key operations
pub trait HashBackend: Send + Sync {
    /// All fields of a hash; empty when the key does not exist
    fn get_all(&self, key: &str) -> Result<Fields>;

    /// Apply mutations atomically and unconditionally, in order
    fn apply(&self, key: &str, mutations: &[Mutation]) -> Result<()>;

    /// Read `key`, let `plan` decide, then commit only if `key` is unchanged
    fn transact(&self, key: &str, plan: &mut TxPlan<'_>) -> Result<TxOutcome>;

    /// Remaining time to live; `None` when missing or persistent
    fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Release connections / resources; later calls fail with `Closed`
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn set_fields(&self, key: &str, fields: Fields) -> Result<()> {
        self.apply(key, &[Mutation::SetFields(fields)])
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.apply(key, &[Mutation::Expire(ttl)])
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.apply(key, &[Mutation::Delete])
    }
}

// =============================================================================
// Ownership
// =============================================================================

/// Whether the engine is responsible for shutting the backend down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Created for the engine; shut down when the engine closes
    Owned,

    /// Supplied by the caller; the engine never shuts it down
    Borrowed,
}

/// A backend plus the engine's ownership of it
#[derive(Clone)]
pub struct BackendHandle {
    backend: Arc<dyn HashBackend>,
    ownership: Ownership,
}

impl BackendHandle {
    pub fn new(backend: Arc<dyn HashBackend>, ownership: Ownership) -> Self {
        Self { backend, ownership }
    }

    /// Engine takes over the backend's lifecycle
    pub fn owned(backend: Arc<dyn HashBackend>) -> Self {
        Self::new(backend, Ownership::Owned)
    }

    /// Caller keeps the backend's lifecycle
    pub fn shared(backend: Arc<dyn HashBackend>) -> Self {
        Self::new(backend, Ownership::Borrowed)
    }

    pub fn backend(&self) -> &Arc<dyn HashBackend> {
        &self.backend
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("ownership", &self.ownership)
            .finish_non_exhaustive()
    }
}
