//! Storage-specific error types.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Read pool exhausted or unavailable.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Failed to send command to the writer, or the writer dropped the
    /// reply before answering.
    #[error("failed to reach writer")]
    ChannelSend,

    /// Concurrent write conflict detected at the transaction boundary.
    /// Should not occur under the single-writer design; retried once as a
    /// safety net before being surfaced.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Invalid data in the database (e.g., unknown enum value).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., writer thread join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Classify a DuckDB error as a transaction conflict.
    pub(crate) fn from_commit(err: duckdb::Error) -> Self {
        let msg = err.to_string();
        if msg.contains("Conflict") || msg.contains("conflict") {
            Self::Conflict(msg)
        } else {
            Self::Database(err)
        }
    }
}
