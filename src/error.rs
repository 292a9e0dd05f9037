//! Error types for the media catalog

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// Caller supplied a value the catalog refuses (bad tag, stars out of
    /// range, unpersisted record handed to a mutation).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected a caller-supplied value
    /// (duplicate path, tag or hash).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The on-disk data contradicts the schema's guarantees. Never absorbed.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Transaction failed: {0}")]
    Transaction(#[source] rusqlite::Error),

    #[error("Outdated catalog schema (major version {found}, supported {supported}); migrate before use")]
    OutdatedSchema { found: i64, supported: i64 },

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Fingerprints incomplete: {} file(s) without hash, {} without size", missing_hash.len(), missing_size.len())]
    IncompleteFingerprints {
        missing_hash: Vec<PathBuf>,
        missing_size: Vec<PathBuf>,
    },

    #[error("State error: {0}")]
    State(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CatalogError {
    /// Maps a statement error to `Conflict` when SQLite reports a constraint
    /// violation, leaving every other failure as a plain database error.
    pub(crate) fn from_statement(err: rusqlite::Error, what: &str) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CatalogError::Conflict(format!(
                    "{}: {}",
                    what,
                    msg.as_deref().unwrap_or("constraint violation")
                ))
            }
            other => CatalogError::Database(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
