//! Store error types.

use thiserror::Error;

/// Errors raised by [`AccessStore`](crate::AccessStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database failed.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The database directory could not be created.
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    /// A card identifier was empty or malformed.
    #[error("invalid card identifier: {0:?}")]
    InvalidCard(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
