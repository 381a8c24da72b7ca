//! Snapshot selection and restore.

use crate::archive::extract_archive;
use crate::naming::{key_for_timestamp, parse_snapshot_timestamp, snapshot_prefix};
use crate::storage::BlobStore;
use crate::transfer::format_bytes;
use crate::utils::{Result, StoreError, VaultError};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Restorer {
    store: Arc<dyn BlobStore>,
    hostname: String,
    cancel_token: CancellationToken,
}

impl Restorer {
    pub fn new(store: Arc<dyn BlobStore>, hostname: impl Into<String>) -> Self {
        Self {
            store,
            hostname: hostname.into(),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Snapshot keys of this host, optionally limited to one directory,
    /// oldest first.
    pub async fn list_snapshots(&self, directory: Option<&Path>) -> Result<Vec<String>> {
        let prefix = snapshot_prefix(&self.hostname, directory);
        let mut keys = tokio::select! {
            result = self.store.list(&prefix) => result?,
            _ = self.cancel_token.cancelled() => return Err(VaultError::Cancelled),
        };
        keys.sort();

        debug!("Found {} snapshots under {}", keys.len(), prefix);
        Ok(keys)
    }

    pub async fn latest_snapshot(&self, directory: &Path) -> Result<String> {
        self.list_snapshots(Some(directory))
            .await?
            .pop()
            .ok_or_else(|| VaultError::NoBackups(directory.display().to_string()))
    }

    /// Key to restore `directory` from. An explicit timestamp is trusted and
    /// turned into a key without asking the store; a blank one means latest.
    pub async fn resolve_snapshot(&self, directory: &Path, timestamp: Option<&str>) -> Result<String> {
        match timestamp.filter(|t| !t.trim().is_empty()) {
            Some(timestamp) => {
                let timestamp = parse_snapshot_timestamp(timestamp)?;
                Ok(key_for_timestamp(&self.hostname, directory, &timestamp))
            }
            None => self.latest_snapshot(directory).await,
        }
    }

    /// Download `key` and extract it under `dest`, either whole or just the
    /// archive entry named `entry_filter`.
    pub async fn restore(&self, key: &str, dest: &Path, entry_filter: Option<&str>) -> Result<()> {
        info!("Restoring {} into {}", self.store.location(key), dest.display());

        let mut reader = tokio::select! {
            result = self.store.get(key) => result.map_err(|e| match e {
                StoreError::NotFound(_) => VaultError::SnapshotNotFound(key.to_string()),
                other => other.into(),
            })?,
            _ = self.cancel_token.cancelled() => return Err(VaultError::Cancelled),
        };

        let mut spool = tempfile::Builder::new()
            .prefix("dirvault-restore-")
            .suffix(".tar.gz")
            .tempfile()?;
        let mut file = tokio::fs::File::from_std(spool.reopen()?);

        let downloaded = tokio::select! {
            result = tokio::io::copy(&mut reader, &mut file) => result?,
            _ = self.cancel_token.cancelled() => return Err(VaultError::Cancelled),
        };
        file.flush().await?;
        drop(file);
        debug!("Downloaded {} ({})", key, format_bytes(downloaded));

        spool.as_file_mut().seek(SeekFrom::Start(0))?;
        let dest = dest.to_path_buf();
        let entry_filter = entry_filter.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            extract_archive(io::BufReader::new(spool.as_file()), &dest, entry_filter.as_deref())
        })
        .await
        .map_err(io::Error::other)??;

        info!("Restored {}", key);
        Ok(())
    }

    /// Where a directory is restored to by default: its parent, since
    /// archive entries start with the directory's own name.
    pub fn default_destination(directory: &Path) -> PathBuf {
        match directory.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BackupExecutor;
    use crate::naming::snapshot_key;
    use crate::storage::{FsBlobStore, StreamReader};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    /// Store that must never be listed
    struct NoListStore(FsBlobStore);

    #[async_trait]
    impl BlobStore for NoListStore {
        async fn put(&self, key: &str, reader: StreamReader, len: u64) -> std::result::Result<(), StoreError> {
            self.0.put(key, reader, len).await
        }

        async fn get(&self, key: &str) -> std::result::Result<StreamReader, StoreError> {
            self.0.get(key).await
        }

        async fn list(&self, _prefix: &str) -> std::result::Result<Vec<String>, StoreError> {
            panic!("list should not be called");
        }

        fn location(&self, key: &str) -> String {
            self.0.location(key)
        }
    }

    async fn put_empty(store: &FsBlobStore, key: &str) -> std::result::Result<(), StoreError> {
        store.put(key, Box::new(&b""[..]), 0).await
    }

    #[tokio::test]
    async fn test_list_and_latest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::new(temp_dir.path());
        put_empty(&store, "cherry/opt-app/2026-02-11T03-00-00Z.tar.gz").await?;
        put_empty(&store, "cherry/opt-app/2026-02-12T03-00-00Z.tar.gz").await?;
        put_empty(&store, "cherry/opt-app-extra/2026-02-13T03-00-00Z.tar.gz").await?;
        put_empty(&store, "apple/opt-app/2026-02-14T03-00-00Z.tar.gz").await?;

        let restorer = Restorer::new(Arc::new(store), "cherry");

        assert_eq!(
            restorer.list_snapshots(Some(Path::new("/opt/app"))).await?,
            vec![
                "cherry/opt-app/2026-02-11T03-00-00Z.tar.gz",
                "cherry/opt-app/2026-02-12T03-00-00Z.tar.gz",
            ]
        );
        assert_eq!(restorer.list_snapshots(None).await?.len(), 3);
        assert_eq!(
            restorer.latest_snapshot(Path::new("/opt/app")).await?,
            "cherry/opt-app/2026-02-12T03-00-00Z.tar.gz"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_without_backups() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let restorer = Restorer::new(Arc::new(FsBlobStore::new(temp_dir.path())), "cherry");

        let result = restorer.latest_snapshot(Path::new("/opt/app")).await;
        assert!(matches!(result, Err(VaultError::NoBackups(ref dir)) if dir == "/opt/app"));
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_snapshot_resolves_without_listing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = NoListStore(FsBlobStore::new(temp_dir.path()));
        let restorer = Restorer::new(Arc::new(store), "cherry");

        let key = restorer
            .resolve_snapshot(Path::new("/opt/app"), Some("2026-02-11T03:00:00Z"))
            .await?;
        assert_eq!(key, "cherry/opt-app/2026-02-11T03-00-00Z.tar.gz");

        let bad = restorer
            .resolve_snapshot(Path::new("/opt/app"), Some("yesterday"))
            .await;
        assert!(matches!(bad, Err(VaultError::InvalidSnapshot(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_snapshot_means_latest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::new(temp_dir.path());
        put_empty(&store, "cherry/opt-app/2026-02-11T03-00-00Z.tar.gz").await?;
        put_empty(&store, "cherry/opt-app/2026-02-12T03-00-00Z.tar.gz").await?;
        let restorer = Restorer::new(Arc::new(store), "cherry");

        for blank in ["", "  "] {
            assert_eq!(
                restorer.resolve_snapshot(Path::new("/opt/app"), Some(blank)).await?,
                "cherry/opt-app/2026-02-12T03-00-00Z.tar.gz"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_missing_snapshot() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let restorer = Restorer::new(Arc::new(FsBlobStore::new(temp_dir.path())), "cherry");

        let result = restorer
            .restore("cherry/opt-app/2026-02-11T03-00-00Z.tar.gz", temp_dir.path(), None)
            .await;
        assert!(matches!(result, Err(VaultError::SnapshotNotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_then_restore() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let data = temp_dir.path().join("srv/app");
        fs::create_dir_all(data.join("nested"))?;
        fs::write(data.join("a.txt"), b"alpha")?;
        fs::write(data.join("nested/b.txt"), b"beta")?;

        let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(temp_dir.path().join("blobs")));
        let now = Utc.with_ymd_and_hms(2026, 2, 11, 3, 0, 0).unwrap();
        BackupExecutor::new(store.clone(), "cherry", temp_dir.path().join("checksums.json"))
            .execute(&[data.clone()], now)
            .await?
            .into_result()?;

        let restorer = Restorer::new(store, "cherry");
        let key = restorer.resolve_snapshot(&data, None).await?;
        assert_eq!(key, snapshot_key("cherry", &data, &now));

        let full = temp_dir.path().join("full");
        restorer.restore(&key, &full, None).await?;
        assert_eq!(fs::read(full.join("app/a.txt"))?, b"alpha");
        assert_eq!(fs::read(full.join("app/nested/b.txt"))?, b"beta");

        let single = temp_dir.path().join("single");
        restorer.restore(&key, &single, Some("app/nested/b.txt")).await?;
        assert_eq!(fs::read(single.join("app/nested/b.txt"))?, b"beta");
        assert!(!single.join("app/a.txt").exists());
        Ok(())
    }

    #[test]
    fn test_default_destination() {
        assert_eq!(
            Restorer::default_destination(Path::new("/opt/homeassistant/config")),
            PathBuf::from("/opt/homeassistant")
        );
        assert_eq!(Restorer::default_destination(Path::new("data")), PathBuf::from("."));
        assert_eq!(Restorer::default_destination(Path::new("/")), PathBuf::from("."));
    }
}
