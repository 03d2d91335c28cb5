//! Error types for the session store
//!
//! Provides a unified error type for all operations.
//!
//! Lookup outcomes such as "not found", "locked" or a lock id mismatch are
//! NOT errors; they are reported through the engine's result types.

use thiserror::Error;

/// Result type alias using SessionStoreError
pub type Result<T> = std::result::Result<T, SessionStoreError>;

/// Unified error type for session store operations
#[derive(Debug, Error)]
pub enum SessionStoreError {
    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend has been shut down")]
    Closed,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Transaction kept conflicting: {0}")]
    Contention(String),
}

impl From<redis::RedisError> for SessionStoreError {
    fn from(err: redis::RedisError) -> Self {
        SessionStoreError::Backend(err.to_string())
    }
}

impl From<r2d2::Error> for SessionStoreError {
    fn from(err: r2d2::Error) -> Self {
        SessionStoreError::Backend(format!("connection pool: {}", err))
    }
}

impl From<bincode::Error> for SessionStoreError {
    fn from(err: bincode::Error) -> Self {
        SessionStoreError::Codec(err.to_string())
    }
}
