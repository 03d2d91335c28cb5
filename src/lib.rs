//! # Harbour Session
//!
//! A distributed session-state store with:
//! - Per-session records in a shared hash-structured backend (Redis)
//! - Exclusive per-session locking built on optimistic transactions
//! - Stale-lock preemption for crashed lock holders
//! - Sliding expiration (TTL) on every qualifying access
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Request-handling layer                       │
//! │            (many threads, many servers)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ SessionStore trait
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Engine                                │
//! │        (key namespace, TTL policy, lock protocol)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Record codec│          │ Lock proto- │
//!   │ (7 fields)  │          │ col (pure)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬───────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │  HashBackend  │
//!               │ Redis/Memory  │
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod namespace;
pub mod lock;
pub mod backend;
pub mod store;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{SessionStoreError, Result};
pub use config::{BackendConfig, ClientMode, FlagsOnRelease, StoreConfig, StoreOptions};
pub use backend::{BackendHandle, HashBackend, MemoryBackend, RedisBackend};
pub use record::{SessionFlags, SessionItems, SessionRecord};
pub use store::{ItemLookup, SessionData, SessionStore};
pub use engine::Engine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
