//! Custom error types for dirvault.

use thiserror::Error;

/// Errors raised by a blob store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response from {url}: {status}")]
    Status { url: String, status: u16 },
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is not a directory")]
    NotADirectory(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Invalid path in archive: {0}")]
    InvalidPath(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("File {0:?} not found in archive")]
    EntryNotFound(String),

    #[error("No backups found for {0}")]
    NoBackups(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Invalid snapshot timestamp: {0}")]
    InvalidSnapshot(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to back up {} directories: {}", .0.len(), .0.join(", "))]
    BackupFailed(Vec<String>),
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_failed_lists_directories() {
        let err = VaultError::BackupFailed(vec!["/opt/a".to_string(), "/opt/b".to_string()]);
        assert_eq!(err.to_string(), "Failed to back up 2 directories: /opt/a, /opt/b");
    }

    #[test]
    fn test_store_error_converts() {
        let err: VaultError = StoreError::NotFound("host/slug/ts.tar.gz".to_string()).into();
        assert!(matches!(err, VaultError::Storage(StoreError::NotFound(_))));
    }
}
