//! Error types for the offline sync engine

use thiserror::Error;

/// Main error type for LabSync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store has not been initialized or was shut down
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Error during storage operations
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Payload could not be encoded or decoded (never retryable)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Decryption failed (wrong key, tampered data, or malformed input)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Stored frame was written by an unknown format version
    #[error("Stored value version {0} is not supported")]
    FrameVersionUnsupported(u8),

    /// Transient remote failure
    #[error("Network error: {0}")]
    Network(String),

    /// Remote store refused the write
    #[error("Remote rejected: {0}")]
    RemoteRejected(String),

    /// Remote call exceeded its deadline
    #[error("Remote call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Queued record was not found
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl SyncError {
    /// Whether repeating the failed operation can succeed without
    /// changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::StorageUnavailable(_)
                | SyncError::Network(_)
                | SyncError::Timeout(_)
                | SyncError::Io(_)
                | SyncError::Transaction(_)
                | SyncError::StorageOp(_)
                | SyncError::Commit(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::RecordNotFound("01HX".to_string());
        assert_eq!(format!("{}", err), "Record not found: 01HX");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sync_err: SyncError = io_err.into();
        assert!(matches!(sync_err, SyncError::Io(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Network("reset".into()).is_retryable());
        assert!(SyncError::StorageUnavailable("closed".into()).is_retryable());
        assert!(!SyncError::Serialization("bad".into()).is_retryable());
        assert!(!SyncError::RemoteRejected("denied".into()).is_retryable());
    }
}
