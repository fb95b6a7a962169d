//! Error types for fast-storage.

use thiserror::Error;

/// Common error type for fast-storage.
///
/// The first six variants form the outward taxonomy; the remaining
/// backend variants are all reported to callers as internal errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Missing, invalid or expired identity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A logical path resolved outside the owner root.
    #[error("path escapes the storage root: {0}")]
    PathTraversal(String),

    /// The write would exceed the owner's allotment.
    #[error("quota exceeded: {requested} bytes requested, {available} bytes available")]
    QuotaExceeded {
        /// Bytes the write asked for.
        requested: u64,
        /// Bytes left in the allotment at the time of the check.
        available: u64,
    },

    /// Referenced node is absent or of the wrong kind.
    #[error("{0} not found")]
    NotFound(String),

    /// Node already exists, or folder is not empty.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed request input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage-backend failure that has no better classification.
    #[error("internal error: {0}")]
    Internal(String),

    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether this error was caused by the caller's input rather than by
    /// the service itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::Unauthorized(_)
                | StorageError::PathTraversal(_)
                | StorageError::QuotaExceeded { .. }
                | StorageError::NotFound(_)
                | StorageError::Conflict(_)
                | StorageError::Validation(_)
        )
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Result type alias for fast-storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
