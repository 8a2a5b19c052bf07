//! Error types for data file sync

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while syncing or managing records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Watched directory does not exist
    DirectoryNotFound,
    /// A read or write against the record store failed
    StoreOperationFailed,
    /// An active record already owns the relative path
    Conflict,
    /// Stat or listing failed for an individual file
    StatFailed,
    /// No record with the requested id
    RecordNotFound,
    /// File referenced by a record or path is missing on disk
    FileNotFound,
    /// Caller supplied an unusable value
    InvalidInput,
    /// I/O error during file operations
    Io,
}

/// Represents an error that occurred during sync or record management
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SyncError {
    /// The kind of error
    pub kind: SyncErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl SyncError {
    /// Create a new sync error
    pub fn new(kind: SyncErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// The watched directory is missing
    pub fn directory_not_found(path: PathBuf) -> Self {
        Self::new(
            SyncErrorKind::DirectoryNotFound,
            Some(path),
            "Raw data directory does not exist",
        )
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::StoreOperationFailed, None, message)
    }

    /// An active record already uses this relative path
    pub fn conflict(relative_path: &str) -> Self {
        Self::new(
            SyncErrorKind::Conflict,
            None,
            format!("An active record already uses {}", relative_path),
        )
    }

    /// Create a stat error for a single file
    pub fn stat_failed(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::StatFailed, Some(path), message)
    }

    pub fn record_not_found(id: i64) -> Self {
        Self::new(
            SyncErrorKind::RecordNotFound,
            None,
            format!("Record {} not found", id),
        )
    }

    pub fn file_not_found(path: PathBuf) -> Self {
        Self::new(
            SyncErrorKind::FileNotFound,
            Some(path),
            "File does not exist",
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::InvalidInput, None, message)
    }

    /// Whether the message is safe to show to a user as-is
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self.kind,
            SyncErrorKind::StoreOperationFailed | SyncErrorKind::Io | SyncErrorKind::StatFailed
        )
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => SyncErrorKind::FileNotFound,
            _ => SyncErrorKind::Io,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                return Self::new(SyncErrorKind::Conflict, None, err.to_string());
            }
        }
        Self::store(err.to_string())
    }
}
