//! Unified error types for quarry.
//!
//! Validation errors are produced while a query chain is being built, before
//! any cache or storage I/O. Storage failures always propagate. Cache failures
//! only surface as [`Error::CacheUnavailable`] when the caller asked for strict
//! cache mode; otherwise the coordinator absorbs them.

use std::time::Duration;

use tokio_rusqlite::rusqlite;

use crate::config::ConfigError;
use crate::model::Trigger;

/// Unified error type for query building, resolution and persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed field/operator combination in a filter.
    #[error("INVALID_PREDICATE: {0}")]
    InvalidPredicate(String),

    /// Negative limit/offset, unknown scope, malformed scope arguments.
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    /// Any failure reported by the storage collaborator.
    #[error("STORAGE_ERROR: {0}")]
    Storage(#[from] StorageError),

    /// Cache backend failure in strict mode.
    #[error("CACHE_UNAVAILABLE: {0}")]
    CacheUnavailable(#[source] CacheError),

    /// A terminal operation that requires a result found none.
    #[error("RECORD_NOT_FOUND: {model} {id}")]
    RecordNotFound { model: String, id: String },

    /// A row or cache payload could not be converted.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// A lifecycle callback rejected the write.
    #[error("CALLBACK_FAILED: {trigger} on {model}: {message}")]
    Callback { model: String, trigger: Trigger, message: String },

    /// Configuration could not be loaded or is invalid.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Failure reported by a storage collaborator.
///
/// The resolver never retries; whatever transport retries exist belong to the
/// collaborator itself.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(tokio_rusqlite::Error),
}

impl From<tokio_rusqlite::Error<StorageError>> for StorageError {
    fn from(err: tokio_rusqlite::Error<StorageError>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => StorageError::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => StorageError::Database(tokio_rusqlite::Error::Close(c)),
            _ => StorageError::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for StorageError {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        StorageError::Database(err)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(tokio_rusqlite::Error::Error(err))
    }
}

/// Failure reported by a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Database operation failed.
    #[error("cache database error: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Backend did not answer within the call's timeout.
    #[error("cache call timed out after {0:?}")]
    Timeout(Duration),

    /// Payload could not be encoded or decoded.
    #[error("cache payload error: {0}")]
    Codec(String),

    /// Backend-specific failure.
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<tokio_rusqlite::Error<CacheError>> for CacheError {
    fn from(err: tokio_rusqlite::Error<CacheError>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => CacheError::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => CacheError::Database(tokio_rusqlite::Error::Close(c)),
            _ => CacheError::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for CacheError {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        CacheError::Database(err)
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Database(tokio_rusqlite::Error::Error(err))
    }
}
