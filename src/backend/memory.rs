//! In-memory backend
//!
//! HashMap-based hash store with RwLock for concurrency.
//!
//! Expired keys are purged lazily on access. Transactions run under the
//! write lock, so they never observe a concurrent change and always commit,
//! unless conflicts were injected with [`MemoryBackend::inject_conflicts`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::{Result, SessionStoreError};
use crate::record::Fields;

use super::{HashBackend, Mutation, TxOutcome, TxPlan};

/// One stored hash
#[derive(Debug, Clone)]
struct Entry {
    fields: Fields,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process hash backend
///
/// ## Concurrency:
/// - `entries`: Protected by RwLock (many concurrent readers, exclusive writer)
/// - `pending_conflicts`, `closed`: Atomics (lock-free)
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,

    /// Number of upcoming transactions that will report a conflict
    pending_conflicts: AtomicUsize,

    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writing transactions fail with [`TxOutcome::Conflict`]
    ///
    /// Simulates another server writing the key between read and commit.
    /// Read-only transactions never conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Whether [`HashBackend::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live (non-expired) keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key
    pub fn flush_all(&self) {
        self.entries.write().clear();
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionStoreError::Closed);
        }
        Ok(())
    }

    /// Take one injected conflict, if any are left
    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Drop the entry if its TTL has passed (write lock held)
    fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
    }

    /// Apply mutations in order (write lock held)
    fn apply_locked(entries: &mut HashMap<String, Entry>, key: &str, mutations: &[Mutation]) {
        let now = Instant::now();
        Self::purge_if_expired(entries, key, now);

        for mutation in mutations {
            match mutation {
                Mutation::SetFields(fields) => {
                    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                        fields: Fields::new(),
                        expires_at: None,
                    });
                    for (name, value) in fields {
                        entry.fields.insert(name.clone(), value.clone());
                    }
                }
                Mutation::Expire(ttl) => {
                    if let Some(entry) = entries.get_mut(key) {
                        entry.expires_at = Some(now + *ttl);
                    }
                }
                Mutation::Delete => {
                    entries.remove(key);
                }
            }
        }
    }
}

impl HashBackend for MemoryBackend {
    fn get_all(&self, key: &str) -> Result<Fields> {
        self.ensure_open()?;

        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.fields.clone())
            .unwrap_or_default())
    }

    fn apply(&self, key: &str, mutations: &[Mutation]) -> Result<()> {
        self.ensure_open()?;

        let mut entries = self.entries.write();
        Self::apply_locked(&mut entries, key, mutations);
        Ok(())
    }

    fn transact(&self, key: &str, plan: &mut TxPlan<'_>) -> Result<TxOutcome> {
        self.ensure_open()?;

        let mut entries = self.entries.write();
        Self::purge_if_expired(&mut entries, key, Instant::now());

        let current = entries
            .get(key)
            .map(|entry| entry.fields.clone())
            .unwrap_or_default();

        let mutations = plan(&current)?;

        if !mutations.is_empty() && self.take_conflict() {
            tracing::trace!(key, "injected transaction conflict");
            return Ok(TxOutcome::Conflict);
        }

        Self::apply_locked(&mut entries, key, &mutations);
        Ok(TxOutcome::Committed)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.ensure_open()?;

        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;

        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    fn shutdown(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("memory backend shut down");
        }
        Ok(())
    }
}
