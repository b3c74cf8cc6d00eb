use thiserror::Error;

use courier_shared::CourierError;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored payload is not valid JSON.
    #[error("Payload decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record without an `id` cannot be cached.
    #[error("Record has no id")]
    MissingId,
}

impl From<StoreError> for CourierError {
    fn from(e: StoreError) -> Self {
        CourierError::Cache(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
