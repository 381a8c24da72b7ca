//! Blob store backed by a local directory.
//!
//! Each object is a file at `<root>/<key>`. Uploads land in a temporary file
//! in the target directory and are renamed into place once complete.

use crate::storage::{key_segments, BlobStore, StreamReader};
use crate::utils::StoreError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const PARTIAL_PREFIX: &str = ".partial-";

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.root.clone();
        path.extend(key_segments(key)?);
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, mut reader: StreamReader, len: u64) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let temp = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(parent)?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let written = tokio::io::copy(&mut reader, &mut file).await?;
        if written != len {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes for {}, got {}", len, key, written),
            )));
        }
        file.sync_all().await?;
        drop(file);

        temp.persist(&path).map_err(|e| e.error)?;
        debug!("Stored {} bytes at {}", written, path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StreamReader, StoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || list_keys(&root, &prefix))
            .await
            .map_err(io::Error::other)?
    }

    fn location(&self, key: &str) -> String {
        format!("file://{}/{}", self.root.display(), key)
    }
}

fn list_keys(root: &Path, prefix: &str) -> Result<Vec<String>, StoreError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if key.starts_with(prefix) {
            keys.push(key);
        }
    }

    keys.sort();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn reader(data: &'static [u8]) -> StreamReader {
        Box::new(data)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() -> Result<(), StoreError> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::new(temp_dir.path());

        store.put("cherry/opt-data/t1.tar.gz", reader(b"archive"), 7).await?;

        let mut body = store.get("cherry/opt-data/t1.tar.gz").await?;
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;
        assert_eq!(data, b"archive");
        Ok(())
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() -> Result<(), StoreError> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::new(temp_dir.path());

        let result = store.get("cherry/none/t.tar.gz").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_put_rejects_short_stream() -> Result<(), StoreError> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::new(temp_dir.path());

        let result = store.put("h/s/t.tar.gz", reader(b"abc"), 10).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(store.list("h/").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_by_prefix() -> Result<(), StoreError> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::new(temp_dir.path());

        store.put("cherry/a/2.tar.gz", reader(b"x"), 1).await?;
        store.put("cherry/a/1.tar.gz", reader(b"x"), 1).await?;
        store.put("cherry/b/1.tar.gz", reader(b"x"), 1).await?;
        store.put("apple/a/1.tar.gz", reader(b"x"), 1).await?;

        assert_eq!(
            store.list("cherry/a/").await?,
            vec!["cherry/a/1.tar.gz", "cherry/a/2.tar.gz"]
        );
        assert_eq!(store.list("cherry/").await?.len(), 3);
        assert!(store.list("banana/").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() -> Result<(), StoreError> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::new(temp_dir.path().join("not-created"));
        assert!(store.list("cherry/").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() -> Result<(), StoreError> {
        let temp_dir = TempDir::new()?;
        let store = FsBlobStore::new(temp_dir.path());

        let result = store.put("../escape.tar.gz", reader(b"x"), 1).await;
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
        Ok(())
    }
}
