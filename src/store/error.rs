//! Error types for store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations
#[derive(Debug)]
pub enum StoreError {
    /// Database connection failed
    ConnectionFailed(String),

    /// Database query failed
    QueryFailed(String),

    /// Migration failed
    MigrationFailed(String),

    /// A row did not decode into the expected shape
    DecodeFailed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to store: {}", msg)
            }
            StoreError::QueryFailed(msg) => write!(f, "store query failed: {}", msg),
            StoreError::MigrationFailed(msg) => write!(f, "database migration failed: {}", msg),
            StoreError::DecodeFailed(msg) => write!(f, "failed to decode row: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::DecodeFailed(err.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::ConnectionFailed(err.to_string())
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}
