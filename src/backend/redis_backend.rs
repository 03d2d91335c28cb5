//! Redis backend
//!
//! Session hashes stored in one or more Redis servers.
//!
//! ## Connection Handling
//! - One `redis::Client` per configured endpoint; no I/O until first use
//! - Endpoints are used round-robin
//! - `Pooled`: one `r2d2` pool per endpoint, `max_size` from `pool_size`;
//!   connections are PINGed on checkout and dropped once broken
//! - `Basic`: every operation opens and drops its own connection
//!
//! ## Transactions
//! `WATCH key` → `HGETALL key` → plan → `MULTI … EXEC`. A nil `EXEC` reply
//! means the key was modified after the watch and maps to a conflict.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::{BackendConfig, ClientMode};
use crate::error::{Result, SessionStoreError};
use crate::record::Fields;

use super::{HashBackend, Mutation, TxOutcome, TxPlan};

type RedisPool = r2d2::Pool<redis::Client>;

/// One configured endpoint
struct RedisNode {
    host: String,
    client: redis::Client,
    /// `None` in basic mode and after shutdown
    pool: RwLock<Option<RedisPool>>,
}

/// Routes pool-level connection errors to tracing
#[derive(Debug)]
struct PoolErrorLogger;

impl r2d2::HandleError<redis::RedisError> for PoolErrorLogger {
    fn handle_error(&self, error: redis::RedisError) {
        tracing::warn!(error = %error, "redis pool connection error");
    }
}

/// Networked Redis backend
pub struct RedisBackend {
    nodes: Vec<RedisNode>,
    next_node: AtomicUsize,
    client_mode: ClientMode,
    pool_size: u32,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl RedisBackend {
    /// Build clients (and pools, in pooled mode) for every configured endpoint
    ///
    /// Only validates the endpoints; connections are opened lazily.
    pub fn connect(config: &BackendConfig) -> Result<Self> {
        if config.hosts.is_empty() {
            return Err(SessionStoreError::Config(
                "at least one host must be configured".to_string(),
            ));
        }

        let pool_size = Self::pool_max_size(config.pool_size);
        let connect_timeout = Self::checkout_timeout(config.connect_timeout);

        let nodes = config
            .hosts
            .iter()
            .map(|host| -> Result<RedisNode> {
                let client = redis::Client::open(Self::connection_url(host))?;
                let pool = match config.client_mode {
                    ClientMode::Pooled => {
                        Some(Self::build_pool(client.clone(), pool_size, connect_timeout))
                    }
                    ClientMode::Basic => None,
                };
                Ok(RedisNode {
                    host: host.clone(),
                    client,
                    pool: RwLock::new(pool),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            hosts = ?config.hosts,
            client_mode = ?config.client_mode,
            pool_size,
            "redis session backend configured"
        );

        Ok(Self {
            nodes,
            next_node: AtomicUsize::new(0),
            client_mode: config.client_mode,
            pool_size,
            connect_timeout,
            closed: AtomicBool::new(false),
        })
    }

    pub fn client_mode(&self) -> ClientMode {
        self.client_mode
    }

    /// Per-endpoint pool capacity
    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Configured endpoints, in round-robin order
    pub fn hosts(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.host.as_str()).collect()
    }

    /// Idle pooled connections across all endpoints
    pub fn idle_connections(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|node| {
                node.pool
                    .read()
                    .as_ref()
                    .map(|pool| pool.state().idle_connections as usize)
            })
            .sum()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// "host:port" → "redis://host:port/"; full URLs pass through
    fn connection_url(host: &str) -> String {
        if host.contains("://") {
            host.to_string()
        } else {
            format!("redis://{}/", host)
        }
    }

    /// r2d2 rejects an empty pool
    fn pool_max_size(configured: usize) -> u32 {
        u32::try_from(configured).unwrap_or(u32::MAX).max(1)
    }

    /// r2d2 rejects a zero checkout timeout
    fn checkout_timeout(configured: Duration) -> Duration {
        configured.max(Duration::from_millis(1))
    }

    fn build_pool(client: redis::Client, max_size: u32, timeout: Duration) -> RedisPool {
        // No idle floor, so building the pool never dials the server
        r2d2::Pool::builder()
            .max_size(max_size)
            .min_idle(Some(0))
            .connection_timeout(timeout)
            .test_on_check_out(true)
            .error_handler(Box::new(PoolErrorLogger))
            .build_unchecked(client)
    }

    /// Run `op` on a pooled or freshly opened connection
    fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut redis::Connection) -> Result<T>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionStoreError::Closed);
        }

        let index = self.next_node.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        let node = &self.nodes[index];

        match self.client_mode {
            ClientMode::Pooled => {
                let pool = node.pool.read().clone().ok_or(SessionStoreError::Closed)?;
                let mut connection = pool.get()?;
                op(&mut *connection)
            }
            ClientMode::Basic => {
                tracing::debug!(host = %node.host, "opening redis connection");
                let mut connection = node.client.get_connection_with_timeout(self.connect_timeout)?;
                op(&mut connection)
            }
        }
    }

    /// Drop a pending WATCH so the connection goes back clean
    fn unwatch(con: &mut redis::Connection) {
        if let Err(e) = redis::cmd("UNWATCH").query::<()>(con) {
            tracing::debug!(error = %e, "redis UNWATCH failed");
        }
    }

    /// Queue mutations onto an atomic pipeline
    fn pipeline(key: &str, mutations: &[Mutation]) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for mutation in mutations {
            match mutation {
                Mutation::SetFields(fields) if fields.is_empty() => {}
                Mutation::SetFields(fields) => {
                    pipe.cmd("HSET").arg(key);
                    for (name, value) in fields {
                        pipe.arg(name.as_str()).arg(value.as_slice());
                    }
                    pipe.ignore();
                }
                Mutation::Expire(ttl) => {
                    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                    pipe.cmd("PEXPIRE").arg(key).arg(millis).ignore();
                }
                Mutation::Delete => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
            }
        }

        pipe
    }
}

impl HashBackend for RedisBackend {
    fn get_all(&self, key: &str) -> Result<Fields> {
        self.with_connection(|con| Ok(redis::cmd("HGETALL").arg(key).query(con)?))
    }

    fn apply(&self, key: &str, mutations: &[Mutation]) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }

        self.with_connection(|con| {
            Self::pipeline(key, mutations).query::<()>(con)?;
            Ok(())
        })
    }

    fn transact(&self, key: &str, plan: &mut TxPlan<'_>) -> Result<TxOutcome> {
        self.with_connection(|con| {
            redis::cmd("WATCH").arg(key).query::<()>(con)?;
            let current: Fields = match redis::cmd("HGETALL").arg(key).query(con) {
                Ok(current) => current,
                Err(e) => {
                    Self::unwatch(con);
                    return Err(e.into());
                }
            };

            let mutations = match plan(&current) {
                Ok(mutations) => mutations,
                Err(e) => {
                    Self::unwatch(con);
                    return Err(e);
                }
            };
            if mutations.is_empty() {
                redis::cmd("UNWATCH").query::<()>(con)?;
                return Ok(TxOutcome::Committed);
            }

            let reply: Option<()> = Self::pipeline(key, &mutations).query(con)?;
            match reply {
                Some(()) => Ok(TxOutcome::Committed),
                None => {
                    tracing::trace!(key, "redis transaction aborted by concurrent write");
                    Ok(TxOutcome::Conflict)
                }
            }
        })
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let millis: i64 = self.with_connection(|con| Ok(redis::cmd("PTTL").arg(key).query(con)?))?;

        // -2: no such key, -1: no expiration
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.with_connection(|con| Ok(redis::cmd("EXISTS").arg(key).query(con)?))
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Idle connections close with the last pool handle; checked-out
        // ones close when their operation returns
        let mut released = 0;
        for node in &self.nodes {
            if let Some(pool) = node.pool.write().take() {
                released += pool.state().idle_connections as usize;
            }
        }

        tracing::info!(released, "redis session backend shut down");
        Ok(())
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("hosts", &self.hosts())
            .field("client_mode", &self.client_mode)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}
