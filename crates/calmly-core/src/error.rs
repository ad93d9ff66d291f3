//! Error types for calmly-core

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type alias using calmly-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in calmly-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage failure (disk full, corruption, constraint violations)
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The store latched into degraded mode after a fatal storage fault
    #[error("Local store is degraded: {0}")]
    Degraded(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sync was requested but no remote backend is configured
    #[error("Sync is not configured")]
    SyncNotConfigured,
}

impl Error {
    /// Whether this error is a storage fault that must put the store in degraded mode.
    ///
    /// Constraint violations and missing rows are programming errors, not faults of
    /// the medium, so they do not qualify.
    pub fn is_fatal_storage(&self) -> bool {
        match self {
            Self::Storage(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                ErrorCode::DiskFull
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::NotADatabase
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::ReadOnly
            ),
            Self::Degraded(_) | Self::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: ErrorCode, extended: i32) -> Error {
        Error::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code,
                extended_code: extended,
            },
            None,
        ))
    }

    #[test]
    fn disk_full_is_fatal() {
        assert!(sqlite_failure(ErrorCode::DiskFull, 13).is_fatal_storage());
        assert!(sqlite_failure(ErrorCode::DatabaseCorrupt, 11).is_fatal_storage());
    }

    #[test]
    fn constraint_violation_is_not_fatal() {
        assert!(!sqlite_failure(ErrorCode::ConstraintViolation, 19).is_fatal_storage());
        assert!(!Error::NotFound("x".to_string()).is_fatal_storage());
    }
}
