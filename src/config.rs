//! Configuration for the session store
//!
//! Centralized configuration with sensible defaults.
//!
//! Caller-facing options are partial ([`StoreOptions`]); they are resolved
//! exactly once, when the engine is built, into a fully populated
//! [`ResolvedOptions`] value that never changes afterwards.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver};

use crate::error::{Result, SessionStoreError};

// =============================================================================
// Defaults
// =============================================================================

/// Separator placed between the application id and the session id
pub const DEFAULT_KEY_SEPARATOR: &str = "/";

/// How long a caller keeps retrying to obtain a session lock
pub const DEFAULT_LOCK_ACQUISITION_TIMEOUT_SECS: u64 = 1;

/// Age after which a held session lock is considered abandoned
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 1;

/// Sliding expiration applied by release / reset operations (minutes)
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 20;

/// Pause between two lock acquisition attempts
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Redis endpoint used when no host is configured
pub const DEFAULT_HOST: &str = "127.0.0.1:6379";

/// Connections per host in a pooled client
pub const DEFAULT_POOL_SIZE: usize = 10;

// =============================================================================
// Lock-not-acquired notification
// =============================================================================

/// Invoked with the session id when lock acquisition gives up
pub type LockNotAcquiredHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Handler used when the caller does not supply one: logs a warning
pub fn default_lock_not_acquired_handler() -> LockNotAcquiredHandler {
    Arc::new(|session_id: &str| {
        tracing::warn!(
            session_id,
            "session could not establish distributed lock; consider increasing the \
             lock acquisition timeout or the lock timeout"
        );
    })
}

/// Build a handler that forwards session ids onto a channel
///
/// Useful when lock failures are consumed as events (metrics, alerting)
/// rather than handled inline.
pub fn lock_not_acquired_channel() -> (LockNotAcquiredHandler, Receiver<String>) {
    let (tx, rx) = channel::unbounded();
    let handler: LockNotAcquiredHandler = Arc::new(move |session_id: &str| {
        // Receiver dropped means nobody is listening anymore
        let _ = tx.send(session_id.to_string());
    });
    (handler, rx)
}

// =============================================================================
// Store Options
// =============================================================================

/// Caller-supplied options; unset fields fall back to library defaults
#[derive(Clone, Default)]
pub struct StoreOptions {
    pub key_separator: Option<String>,
    pub distributed_lock_acquisition_timeout_seconds: Option<u64>,
    pub distributed_lock_timeout_seconds: Option<u64>,
    pub on_lock_not_acquired: Option<LockNotAcquiredHandler>,
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("key_separator", &self.key_separator)
            .field(
                "distributed_lock_acquisition_timeout_seconds",
                &self.distributed_lock_acquisition_timeout_seconds,
            )
            .field(
                "distributed_lock_timeout_seconds",
                &self.distributed_lock_timeout_seconds,
            )
            .field("on_lock_not_acquired", &self.on_lock_not_acquired.is_some())
            .finish()
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the key separator
    pub fn key_separator(mut self, separator: impl Into<String>) -> Self {
        self.key_separator = Some(separator.into());
        self
    }

    /// Override the lock acquisition timeout (seconds)
    pub fn lock_acquisition_timeout_seconds(mut self, secs: u64) -> Self {
        self.distributed_lock_acquisition_timeout_seconds = Some(secs);
        self
    }

    /// Override the stale-lock threshold (seconds)
    pub fn lock_timeout_seconds(mut self, secs: u64) -> Self {
        self.distributed_lock_timeout_seconds = Some(secs);
        self
    }

    /// Install a handler called when lock acquisition is exhausted
    pub fn on_lock_not_acquired<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_lock_not_acquired = Some(Arc::new(handler));
        self
    }

    /// Install an already shared handler
    pub fn on_lock_not_acquired_handler(mut self, handler: LockNotAcquiredHandler) -> Self {
        self.on_lock_not_acquired = Some(handler);
        self
    }

    /// Merge with library defaults: the first value set wins
    pub fn resolve(&self) -> ResolvedOptions {
        ResolvedOptions {
            key_separator: self
                .key_separator
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY_SEPARATOR.to_string()),
            lock_acquisition_timeout: Duration::from_secs(
                self.distributed_lock_acquisition_timeout_seconds
                    .unwrap_or(DEFAULT_LOCK_ACQUISITION_TIMEOUT_SECS),
            ),
            lock_timeout: Duration::from_secs(
                self.distributed_lock_timeout_seconds
                    .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS),
            ),
            on_lock_not_acquired: self
                .on_lock_not_acquired
                .clone()
                .unwrap_or_else(default_lock_not_acquired_handler),
        }
    }
}

/// Fully populated, immutable options consumed by the engine
#[derive(Clone)]
pub struct ResolvedOptions {
    pub key_separator: String,
    pub lock_acquisition_timeout: Duration,
    pub lock_timeout: Duration,
    pub on_lock_not_acquired: LockNotAcquiredHandler,
}

impl fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("key_separator", &self.key_separator)
            .field("lock_acquisition_timeout", &self.lock_acquisition_timeout)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// What happens to the stored flags when a locked session is written back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagsOnRelease {
    /// Every explicit write resets the flags to `None`
    #[default]
    Reset,

    /// Keep whatever flags the record already carried
    Preserve,
}

/// Main configuration for a session store engine
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Namespace prefix for every session key (usually the application name)
    pub application_id: String,

    /// Sliding expiration (minutes) used by release and reset operations
    pub default_timeout_minutes: u32,

    /// Pause between lock acquisition attempts
    pub lock_poll_interval: Duration,

    /// Flag policy for non-new writes
    pub flags_on_release: FlagsOnRelease,

    /// Caller options, resolved when the engine is built
    pub options: StoreOptions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            application_id: String::new(),
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            flags_on_release: FlagsOnRelease::default(),
            options: StoreOptions::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder(application_id: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder {
            config: StoreConfig {
                application_id: application_id.into(),
                ..StoreConfig::default()
            },
        }
    }
}

/// Builder for StoreConfig
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the default sliding expiration (minutes)
    pub fn default_timeout_minutes(mut self, minutes: u32) -> Self {
        self.config.default_timeout_minutes = minutes;
        self
    }

    /// Set the pause between lock acquisition attempts
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.config.lock_poll_interval = interval;
        self
    }

    /// Set the flag policy for non-new writes
    pub fn flags_on_release(mut self, policy: FlagsOnRelease) -> Self {
        self.config.flags_on_release = policy;
        self
    }

    /// Set the caller options
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.config.options = options;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// How the Redis backend hands out connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientMode {
    /// Connections are checked out of a per-host pool
    #[default]
    Pooled,

    /// A fresh connection per operation
    Basic,
}

impl FromStr for ClientMode {
    type Err = SessionStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pooled" => Ok(ClientMode::Pooled),
            "basic" => Ok(ClientMode::Basic),
            other => Err(SessionStoreError::Config(format!(
                "unknown client type '{}' (expected 'pooled' or 'basic')",
                other
            ))),
        }
    }
}

/// Connection settings for the shared Redis backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// One or more `host:port` endpoints
    pub hosts: Vec<String>,

    /// Pooled vs single-client
    pub client_mode: ClientMode,

    /// Pool capacity per host in pooled mode (at least 1)
    pub pool_size: usize,

    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_HOST.to_string()],
            client_mode: ClientMode::default(),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl BackendConfig {
    /// Setting name holding the comma separated endpoint list
    pub const HOST_SETTING: &'static str = "host";

    /// Setting name holding `pooled` or `basic`
    pub const CLIENT_TYPE_SETTING: &'static str = "clientType";

    /// Create a new config builder
    pub fn builder() -> BackendConfigBuilder {
        BackendConfigBuilder::default()
    }

    /// Build from loose name/value settings (keys are case-insensitive)
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let lookup = |name: &str| {
            settings
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim())
                .filter(|v| !v.is_empty())
        };

        let mut config = BackendConfig::default();

        if let Some(hosts) = lookup(Self::HOST_SETTING) {
            config.hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(client_type) = lookup(Self::CLIENT_TYPE_SETTING) {
            config.client_mode = client_type.parse()?;
        }

        if config.hosts.is_empty() {
            return Err(SessionStoreError::Config(
                "at least one host must be configured".to_string(),
            ));
        }

        Ok(config)
    }
}

/// Builder for BackendConfig
#[derive(Default)]
pub struct BackendConfigBuilder {
    config: BackendConfig,
}

impl BackendConfigBuilder {
    /// Replace the endpoint list
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the client mode
    pub fn client_mode(mut self, mode: ClientMode) -> Self {
        self.config.client_mode = mode;
        self
    }

    /// Set the per-host pool size
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> BackendConfig {
        self.config
    }
}
