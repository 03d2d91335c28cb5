//! Engine Module
//!
//! The session store engine that coordinates all components.
//!
//! ## Responsibilities
//! - Map session ids to backend keys
//! - Decode / encode records inside backend transactions
//! - Run the distributed lock protocol for exclusive reads and releases
//! - Apply the sliding expiration (TTL) policy
//! - Own (or borrow) the backend connection lifecycle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::{BackendHandle, HashBackend, Mutation, RedisBackend, TxOutcome, TxPlan};
use crate::config::{BackendConfig, FlagsOnRelease, ResolvedOptions, StoreConfig};
use crate::error::{Result, SessionStoreError};
use crate::lock::{self, AcquireAttempt, LockInfo};
use crate::namespace::KeyNamespace;
use crate::record::{self, timestamp_now, BincodeItemCodec, Fields, ItemCodec, SessionFlags, SessionRecord};
use crate::store::{ExpireCallback, ItemLookup, SessionData, SessionStore};

/// How often a conflicting (non-acquire) transaction is retried
pub const MAX_TX_RETRIES: usize = 8;

/// Progress of one acquisition attempt
enum Acquisition {
    Pending,
    NotFound,
    Held(LockInfo),
    Acquired {
        found: ItemLookup,
        stolen_from: Option<LockInfo>,
    },
}

/// The session store engine
///
/// ## Concurrency Model
///
/// The engine holds no lock of its own. Every read-modify-write runs as an
/// optimistic backend transaction on the session's key, so engines on many
/// servers can share one backend:
/// - Exclusive reads race each other; the loser sees a conflict and retries
///   until the acquisition timeout (no FIFO ordering among waiters)
/// - A lock older than the lock timeout is stolen by the next acquirer
/// - Releases, writes and removes only apply while the caller's lock id
///   still owns the record; otherwise they are silent no-ops
pub struct Engine {
    namespace: KeyNamespace,

    /// Resolved caller options (separator, lock timeouts, callback)
    options: ResolvedOptions,

    /// Expiration used by release / reset (minutes)
    default_timeout_minutes: u32,

    lock_poll_interval: Duration,

    flags_on_release: FlagsOnRelease,

    item_codec: Arc<dyn ItemCodec>,

    backend: BackendHandle,

    /// Set once the owned backend has been shut down
    closed: AtomicBool,
}

impl Engine {
    /// Build an engine on top of an existing backend handle
    ///
    /// Options are resolved against library defaults here, once.
    pub fn open(config: StoreConfig, backend: BackendHandle) -> Result<Self> {
        if config.application_id.is_empty() {
            return Err(SessionStoreError::Config(
                "application id must not be empty".to_string(),
            ));
        }

        let options = config.options.resolve();
        let namespace = KeyNamespace::new(config.application_id, options.key_separator.clone());

        tracing::debug!(
            application_id = namespace.application_id(),
            separator = namespace.separator(),
            default_timeout_minutes = config.default_timeout_minutes,
            lock_timeout = ?options.lock_timeout,
            lock_acquisition_timeout = ?options.lock_acquisition_timeout,
            owned_backend = backend.is_owned(),
            "session store engine opened"
        );

        Ok(Self {
            namespace,
            options,
            default_timeout_minutes: config.default_timeout_minutes,
            lock_poll_interval: config.lock_poll_interval,
            flags_on_release: config.flags_on_release,
            item_codec: Arc::new(BincodeItemCodec),
            backend,
            closed: AtomicBool::new(false),
        })
    }

    /// Build an engine that creates and owns its Redis backend
    pub fn connect(config: StoreConfig, backend_config: &BackendConfig) -> Result<Self> {
        let backend = RedisBackend::connect(backend_config)?;
        Self::open(config, BackendHandle::owned(Arc::new(backend)))
    }

    /// Replace the item payload codec
    pub fn with_item_codec(mut self, codec: Arc<dyn ItemCodec>) -> Self {
        self.item_codec = codec;
        self
    }

    /// Read a stored record without locking or sliding its expiration
    pub fn inspect(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let fields = self.backend().get_all(&self.key(session_id))?;
        self.decode_fields(&fields)
    }

    /// Remaining time to live of a session's backend entry
    pub fn time_to_live(&self, session_id: &str) -> Result<Option<Duration>> {
        self.backend().ttl(&self.key(session_id))
    }

    /// Backend key for a session id
    pub fn key(&self, session_id: &str) -> String {
        self.namespace.key(session_id)
    }

    /// Close the engine, shutting down the backend if the engine owns it
    pub fn close(self) -> Result<()> {
        self.shutdown_backend()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    pub fn default_timeout_minutes(&self) -> u32 {
        self.default_timeout_minutes
    }

    pub fn backend_handle(&self) -> &BackendHandle {
        &self.backend
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn backend(&self) -> &dyn HashBackend {
        self.backend.backend().as_ref()
    }

    fn decode_fields(&self, fields: &Fields) -> Result<Option<SessionRecord>> {
        record::decode(fields, self.item_codec.as_ref())
    }

    fn encode_record(&self, record: &SessionRecord) -> Result<Fields> {
        record::encode(record, self.item_codec.as_ref())
    }

    fn minutes(minutes: u32) -> Duration {
        Duration::from_secs(u64::from(minutes) * 60)
    }

    /// Overwrite a key with `record`, dropping whatever was there before
    fn overwrite(&self, key: &str, record: &SessionRecord) -> Result<()> {
        let fields = self.encode_record(record)?;
        self.backend().apply(
            key,
            &[
                Mutation::Delete,
                Mutation::SetFields(fields),
                Mutation::Expire(Self::minutes(record.timeout_minutes)),
            ],
        )
    }

    /// Run `plan` until it commits, up to [`MAX_TX_RETRIES`] times
    fn transact_with_retry(&self, key: &str, plan: &mut TxPlan<'_>) -> Result<()> {
        for attempt in 1..=MAX_TX_RETRIES {
            match self.backend().transact(key, &mut *plan)? {
                TxOutcome::Committed => return Ok(()),
                TxOutcome::Conflict => {
                    tracing::trace!(key, attempt, "transaction conflict, retrying");
                }
            }
        }

        Err(SessionStoreError::Contention(format!(
            "{} after {} attempts",
            key, MAX_TX_RETRIES
        )))
    }

    /// One acquisition attempt: read, decide, and commit the lock if possible
    fn try_lock(&self, key: &str) -> Result<(TxOutcome, Acquisition)> {
        let mut acquisition = Acquisition::Pending;

        let outcome = self.backend().transact(key, &mut |fields| {
            let Some(current) = self.decode_fields(fields)? else {
                acquisition = Acquisition::NotFound;
                return Ok(Vec::new());
            };

            let (mut locked, stolen_from) =
                match lock::try_acquire(&current, timestamp_now(), self.options.lock_timeout) {
                    AcquireAttempt::Held(held) => {
                        acquisition = Acquisition::Held(held);
                        return Ok(Vec::new());
                    }
                    AcquireAttempt::Acquired(record) => (record, None),
                    AcquireAttempt::Stolen { record, previous } => (record, Some(previous)),
                };

            // The caller sees the stored flags once; the marker is then cleared
            let flags = locked.flags;
            locked.flags = SessionFlags::None;

            let ttl = Self::minutes(locked.timeout_minutes);
            acquisition = Acquisition::Acquired {
                found: ItemLookup::Found {
                    data: SessionData::new(locked.items.clone(), locked.timeout_minutes),
                    flags,
                    lock_id: Some(locked.lock_id),
                },
                stolen_from,
            };

            Ok(vec![
                Mutation::SetFields(self.encode_record(&locked)?),
                Mutation::Expire(ttl),
            ])
        })?;

        Ok((outcome, acquisition))
    }

    fn shutdown_backend(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) || !self.backend.is_owned() {
            return Ok(());
        }
        self.backend().shutdown()
    }
}

impl SessionStore for Engine {
    fn create_uninitialized_item(&self, session_id: &str, timeout_minutes: u32) -> Result<()> {
        let key = self.key(session_id);
        self.overwrite(&key, &SessionRecord::uninitialized(timeout_minutes))?;

        tracing::debug!(session_id, timeout_minutes, "uninitialized session created");
        Ok(())
    }

    fn get_item(&self, session_id: &str) -> Result<ItemLookup> {
        let key = self.key(session_id);
        let mut lookup = ItemLookup::NotFound;

        self.transact_with_retry(&key, &mut |fields| {
            let Some(current) = self.decode_fields(fields)? else {
                lookup = ItemLookup::NotFound;
                return Ok(Vec::new());
            };

            if let Some(held) = current.lock_info() {
                lookup = ItemLookup::Locked {
                    lock_age: held.age(timestamp_now()),
                    lock_id: held.lock_id,
                };
                return Ok(Vec::new());
            }

            let ttl = Self::minutes(current.timeout_minutes);
            lookup = ItemLookup::Found {
                data: SessionData::new(current.items, current.timeout_minutes),
                flags: current.flags,
                lock_id: None,
            };
            Ok(vec![Mutation::Expire(ttl)])
        })?;

        tracing::debug!(session_id, found = lookup.is_found(), locked = lookup.is_locked(), "get_item");
        Ok(lookup)
    }

    fn get_item_exclusive(&self, session_id: &str) -> Result<ItemLookup> {
        let key = self.key(session_id);
        // A timeout past the clock's range means waiting indefinitely
        let deadline = Instant::now().checked_add(self.options.lock_acquisition_timeout);
        let mut last_held: Option<LockInfo> = None;
        let mut attempts = 0usize;

        loop {
            attempts += 1;

            match self.try_lock(&key)? {
                (TxOutcome::Conflict, _) => {
                    tracing::trace!(session_id, attempts, "lock acquisition raced, retrying");
                }
                (TxOutcome::Committed, Acquisition::NotFound) => {
                    tracing::debug!(session_id, "get_item_exclusive: not found");
                    return Ok(ItemLookup::NotFound);
                }
                (TxOutcome::Committed, Acquisition::Acquired { found, stolen_from }) => {
                    if let Some(previous) = stolen_from {
                        tracing::warn!(
                            session_id,
                            previous_lock_id = previous.lock_id,
                            previous_lock_age = ?previous.age(timestamp_now()),
                            "stale session lock stolen"
                        );
                    }
                    tracing::debug!(session_id, lock_id = ?found.lock_id(), attempts, "session locked");
                    return Ok(found);
                }
                (TxOutcome::Committed, Acquisition::Held(held)) => {
                    last_held = Some(held);
                }
                (TxOutcome::Committed, Acquisition::Pending) => {}
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.lock_poll_interval.min(deadline - now)
                }
                None => self.lock_poll_interval,
            };
            thread::sleep(pause);
        }

        tracing::debug!(session_id, attempts, "lock acquisition timed out");
        (self.options.on_lock_not_acquired)(session_id);

        let held = match last_held {
            Some(held) => Some(held),
            // Every attempt conflicted; report whoever holds the record now
            None => match self.inspect(session_id)? {
                Some(current) => current.lock_info(),
                None => return Ok(ItemLookup::NotFound),
            },
        };

        let (lock_age, lock_id) = match held {
            Some(held) => (held.age(timestamp_now()), held.lock_id),
            None => (Duration::ZERO, SessionRecord::NO_LOCK_ID),
        };
        Ok(ItemLookup::Locked { lock_age, lock_id })
    }

    fn set_and_release_item_exclusive(
        &self,
        session_id: &str,
        data: &SessionData,
        lock_id: Option<u32>,
        new_item: bool,
    ) -> Result<()> {
        let key = self.key(session_id);

        if new_item {
            let fresh = SessionRecord::with_items(data.items.clone(), data.timeout_minutes);
            self.overwrite(&key, &fresh)?;
            tracing::debug!(session_id, timeout_minutes = data.timeout_minutes, "new session stored");
            return Ok(());
        }

        let Some(lock_id) = lock_id else {
            tracing::debug!(session_id, "set_and_release without lock id ignored");
            return Ok(());
        };

        let mut released = false;
        self.transact_with_retry(&key, &mut |fields| {
            released = false;

            let Some(current) = self.decode_fields(fields)? else {
                return Ok(Vec::new());
            };
            let Some(mut updated) = lock::release(&current, lock_id) else {
                return Ok(Vec::new());
            };

            updated.items = data.items.clone();
            updated.timeout_minutes = data.timeout_minutes;
            if self.flags_on_release == FlagsOnRelease::Reset {
                updated.flags = SessionFlags::None;
            }

            released = true;
            Ok(vec![
                Mutation::SetFields(self.encode_record(&updated)?),
                Mutation::Expire(Self::minutes(data.timeout_minutes)),
            ])
        })?;

        tracing::debug!(session_id, lock_id, released, "set_and_release_item_exclusive");
        Ok(())
    }

    fn release_item_exclusive(&self, session_id: &str, lock_id: u32) -> Result<()> {
        let key = self.key(session_id);
        let ttl = Self::minutes(self.default_timeout_minutes);
        let mut released = false;

        self.transact_with_retry(&key, &mut |fields| {
            released = false;

            let Some(current) = self.decode_fields(fields)? else {
                return Ok(Vec::new());
            };
            let Some(unlocked) = lock::release(&current, lock_id) else {
                return Ok(Vec::new());
            };

            released = true;
            Ok(vec![
                Mutation::SetFields(self.encode_record(&unlocked)?),
                Mutation::Expire(ttl),
            ])
        })?;

        tracing::debug!(session_id, lock_id, released, "release_item_exclusive");
        Ok(())
    }

    fn remove_item(&self, session_id: &str, lock_id: u32) -> Result<()> {
        let key = self.key(session_id);
        let mut removed = false;

        self.transact_with_retry(&key, &mut |fields| {
            removed = false;

            match self.decode_fields(fields)? {
                Some(current) if lock::is_held_by(&current, lock_id) => {
                    removed = true;
                    Ok(vec![Mutation::Delete])
                }
                _ => Ok(Vec::new()),
            }
        })?;

        tracing::debug!(session_id, lock_id, removed, "remove_item");
        Ok(())
    }

    fn reset_item_timeout(&self, session_id: &str) -> Result<()> {
        self.backend().expire(
            &self.key(session_id),
            Self::minutes(self.default_timeout_minutes),
        )
    }

    fn set_item_expire_callback(&self, _callback: ExpireCallback) -> bool {
        tracing::debug!("expire callbacks are not supported by this store");
        false
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_backend() {
            tracing::warn!("failed to shut down session backend: {}", e);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("namespace", &self.namespace)
            .field("options", &self.options)
            .field("default_timeout_minutes", &self.default_timeout_minutes)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
