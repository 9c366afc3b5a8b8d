//! Unified error types for cachet.
//!
//! Every variant maps onto an [`ErrorKind`], the explicit taxonomy the
//! engine uses to decide between "report and continue" and the destructive
//! reset path. Only genuine schema or file-format damage classifies as
//! [`ErrorKind::Corruption`]; every other storage failure is treated as a
//! plain miss or dropped write.

use tokio_rusqlite::rusqlite::{self, ErrorCode};

/// Unified error type for the cache engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store name is not part of the resolved schema.
    #[error("STORE_NOT_FOUND: {0}")]
    StoreNotFound(String),

    /// Caller-supplied key fields or query were rejected.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A duration string did not follow the `<int><s|m|h|d|w>` grammar.
    #[error("INVALID_DURATION: {0:?}")]
    InvalidDuration(String),

    /// Configuration could not be loaded or failed validation.
    #[error("CONFIG_ERROR: {0}")]
    Config(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// On-disk state does not match the configured schema.
    #[error("SCHEMA_CORRUPTION: {0}")]
    SchemaCorruption(String),

    /// Payload or key could not be encoded or decoded as JSON.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation on the cache container failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification used by the engine's failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown store.
    NotFound,
    /// Rejected input or configuration.
    Invalid,
    /// Storage failure unrelated to schema integrity.
    Storage,
    /// Schema/version mismatch or damaged container.
    Corruption,
}

impl Error {
    /// Classify the error at the storage boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StoreNotFound(_) => ErrorKind::NotFound,
            Error::InvalidInput(_) | Error::InvalidDuration(_) | Error::Config(_) | Error::Serialization(_) => {
                ErrorKind::Invalid
            }
            Error::SchemaCorruption(_) => ErrorKind::Corruption,
            Error::Io(_) => ErrorKind::Storage,
            Error::Database(tokio_rusqlite::Error::Error(e)) if is_corruption(e) => ErrorKind::Corruption,
            Error::Database(_) => ErrorKind::Storage,
        }
    }

    /// Shorthand for `kind() == ErrorKind::Corruption`.
    pub fn is_corruption(&self) -> bool {
        self.kind() == ErrorKind::Corruption
    }
}

/// SQLite signals that mean the container can no longer be trusted.
fn is_corruption(err: &rusqlite::Error) -> bool {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => true,
        _ => matches!(
            err,
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table")
        ),
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
