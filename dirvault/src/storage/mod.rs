//! Object storage used to hold snapshot archives.
//!
//! The backup and restore flows only need three operations: upload a stream
//! under a key, download a key, and list keys under a prefix. Backends
//! implement [`BlobStore`]; [`open`] picks one from the configuration.

pub mod fs;
pub mod http;

use crate::config::{Credentials, StorageConfig};
use crate::utils::{Result, StoreError, VaultError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub use fs::FsBlobStore;
pub use http::HttpBlobStore;

pub type StreamReader = Box<dyn AsyncRead + Unpin + Send>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `len` bytes read from `reader` under `key`, replacing any
    /// existing object.
    async fn put(&self, key: &str, reader: StreamReader, len: u64) -> std::result::Result<(), StoreError>;

    /// Open the object stored under `key`.
    async fn get(&self, key: &str) -> std::result::Result<StreamReader, StoreError>;

    /// Keys starting with `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> std::result::Result<Vec<String>, StoreError>;

    /// Human readable location of `key`, for log lines.
    fn location(&self, key: &str) -> String;
}

/// Build the store described by the configuration.
pub fn open(config: &StorageConfig, credentials: Option<Credentials>) -> Result<Arc<dyn BlobStore>> {
    match config {
        StorageConfig::Fs { root } => Ok(Arc::new(FsBlobStore::new(root.clone()))),
        StorageConfig::Http { endpoint, bucket } => {
            let credentials = credentials.ok_or_else(|| {
                VaultError::Config("the http storage backend requires credentials".to_string())
            })?;
            Ok(Arc::new(HttpBlobStore::new(endpoint, bucket, credentials)?))
        }
    }
}

/// Split a key into its `/`-separated segments, rejecting keys that could
/// address anything outside the store.
pub fn key_segments(key: &str) -> std::result::Result<Vec<&str>, StoreError> {
    let segments: Vec<&str> = key.split('/').collect();

    let valid = !key.is_empty()
        && segments
            .iter()
            .all(|s| !s.is_empty() && *s != "." && *s != ".." && !s.contains('\\'));

    if valid {
        Ok(segments)
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_segments() {
        assert_eq!(
            key_segments("cherry/opt-data/2026-02-11T03-00-00Z.tar.gz").unwrap(),
            vec!["cherry", "opt-data", "2026-02-11T03-00-00Z.tar.gz"]
        );

        for key in ["", "/abs", "a//b", "a/../b", "a/./b", "trailing/", "a\\b"] {
            assert!(
                matches!(key_segments(key), Err(StoreError::InvalidKey(_))),
                "{:?} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_open_http_requires_credentials() {
        let config = StorageConfig::Http {
            endpoint: "https://objects.example.net".to_string(),
            bucket: "backups".to_string(),
        };

        assert!(matches!(open(&config, None), Err(VaultError::Config(_))));
    }
}
