//! Error types shared by every Waypost crate.

use thiserror::Error;

/// Result type alias for core and storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned across every public boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Local store failure (I/O, quota, lock contention, failed upgrade)
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Caller supplied data that cannot be stored
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Remote delivery failure
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create connection pool: {0}")]
    PoolCreationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Another connection holds a lock that prevents the schema upgrade.
    #[error("Schema upgrade blocked by another connection: {0}")]
    UpgradeBlocked(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Remote delivery errors, split by whether another attempt can succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network failure or remote server error; consumes one retry.
    #[error("Transient sync failure: {0}")]
    Transient(String),

    /// Remote rejected the payload (validation, conflict it will not accept).
    #[error("Permanent sync failure: {0}")]
    Permanent(String),
}

impl Error {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Error::Database(DatabaseError::NotFound(format!("{} '{}'", entity, id)))
    }

    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation(ValidationError::InvalidValue {
            field: field.into(),
            message: message.into(),
        })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Database(DatabaseError::NotFound(_)))
    }

    /// `Some(true)` for permanent remote rejections, `Some(false)` for
    /// transient ones, `None` for local errors.
    pub fn is_permanent_sync_failure(&self) -> Option<bool> {
        match self {
            Error::Sync(SyncError::Permanent(_)) => Some(true),
            Error::Sync(SyncError::Transient(_)) => Some(false),
            _ => None,
        }
    }
}
