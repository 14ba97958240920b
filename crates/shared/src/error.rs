//! Error taxonomy for store and persistence operations.

use thiserror::Error;

/// Errors returned by domain-store operations. User-initiated actions
/// surface these; background workflows log and swallow them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad input rejected before any mutation happened.
    #[error("{0}")]
    Validation(String),
    /// A referenced id does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure writing the local snapshot. Logged, never surfaced: the store
/// is a best-effort local cache, and the in-memory mutation already took.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}
