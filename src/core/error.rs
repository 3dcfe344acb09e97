use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Facade accessor used before `open` or after `close`.
    #[error("Storage not open: {0}")]
    NotOpen(String),
    #[error("Storage already open: {0}")]
    AlreadyOpen(String),
    #[error("Store already connected: {0}")]
    AlreadyConnected(String),
    #[error("Unable to write, client not connected: {0}")]
    NotWritable(String),
    #[error("Unable to read, client not connected: {0}")]
    NotReadable(String),
    #[error("Unsupported storage type: {0}")]
    UnsupportedStorageType(String),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Serialization error for {container_type}: {message}")]
    Serialization {
        container_type: String,
        message: String,
    },
    #[error("Incompatible storage format: {0}")]
    IncompatibleFormat(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Backend timed out: {0}")]
    Timeout(String),
    #[error("Backend disconnected: {0}")]
    Disconnected(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("SQLite error: {0}")]
    RusqliteError(rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl StorageError {
    /// Whether the failed round-trip may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::Disconnected(_))
    }

    pub(crate) fn serialization(container_type: &str, message: impl ToString) -> Self {
        StorageError::Serialization {
            container_type: container_type.to_string(),
            message: message.to_string(),
        }
    }
}

// Busy and locked map to Timeout: the busy timeout is the round-trip window.
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StorageError::Timeout(err.to_string())
            }
            _ => StorageError::RusqliteError(err),
        }
    }
}
