//! Error types for the local service cache.

use thiserror::Error;

/// Errors returned by [`LocalStore`](crate::store::LocalStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error from the underlying SQLite connection.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A list column could not be encoded or decoded as JSON.
    #[error("Column encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Filesystem error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}
