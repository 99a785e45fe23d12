//! Storage-layer errors and their mapping onto core errors.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use waypost_core::errors::{DatabaseError, Error};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] DieselError),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn is_lock_contention(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("busy")
}

fn is_quota_exceeded(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("database or disk is full") || lower.contains("no space left on device")
}

impl StorageError {
    /// Migration failures caused by another connection's lock are reported as
    /// a blocked upgrade rather than a broken schema.
    pub fn into_migration_error(self) -> Error {
        let message = self.to_string();
        if is_lock_contention(&message) {
            Error::Database(DatabaseError::UpgradeBlocked(message))
        } else {
            Error::Database(DatabaseError::MigrationFailed(message))
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Query(DieselError::NotFound) => {
                Error::Database(DatabaseError::NotFound("record not found".to_string()))
            }
            StorageError::Query(DieselError::DatabaseError(kind, info)) => {
                let message = info.message().to_string();
                if is_quota_exceeded(&message) {
                    return Error::Database(DatabaseError::QuotaExceeded(message));
                }
                match kind {
                    DatabaseErrorKind::UniqueViolation
                    | DatabaseErrorKind::CheckViolation
                    | DatabaseErrorKind::NotNullViolation
                    | DatabaseErrorKind::ForeignKeyViolation => {
                        Error::Database(DatabaseError::QueryFailed(message))
                    }
                    _ => Error::Database(DatabaseError::Internal(message)),
                }
            }
            StorageError::Query(other) => {
                Error::Database(DatabaseError::QueryFailed(other.to_string()))
            }
            StorageError::Connection(e) => {
                Error::Database(DatabaseError::ConnectionFailed(e.to_string()))
            }
            StorageError::Pool(e) => Error::Database(DatabaseError::ConnectionFailed(e.to_string())),
            StorageError::Migration(message) => {
                StorageError::Migration(message).into_migration_error()
            }
            StorageError::Io(e) => {
                let message = e.to_string();
                if is_quota_exceeded(&message) {
                    Error::Database(DatabaseError::QuotaExceeded(message))
                } else {
                    Error::Database(DatabaseError::ConnectionFailed(message))
                }
            }
        }
    }
}
