//! Deterministic directory traversal for archive construction.
//!
//! [`TreeWalk`] is a lazy iterator over every node below a root directory,
//! depth-first, with the children of each directory sorted by file name.
//! Entry paths are relative to the parent of the root, so the root's own
//! name is the first segment of every path.

use crate::fs::metadata::EntryMetadata;
use crate::naming::clean_path;
use crate::utils::{Result, VaultError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One node discovered during walking.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Full path to the node on disk
    pub path: PathBuf,

    /// Path stored in the archive (`<root name>/<relative path>`)
    pub archive_path: PathBuf,

    pub metadata: EntryMetadata,
}

/// Lazy, sorted, depth-first walk of a directory tree.
///
/// Symlinks are reported as symlinks and never descended into; only the root
/// is resolved if it is itself a link. Any I/O error is yielded as an `Err`
/// and callers are expected to stop there.
pub struct TreeWalk {
    root: PathBuf,
    root_name: OsString,
    inner: walkdir::IntoIter,
}

impl TreeWalk {
    pub fn new(root: &Path) -> Result<Self> {
        let root_name = root_name(root)?;

        let inner = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            root: root.to_path_buf(),
            root_name,
            inner,
        })
    }

    fn entry(&self, entry: walkdir::DirEntry) -> Result<TreeEntry> {
        let path = entry.path();

        let metadata = if entry.depth() == 0 {
            EntryMetadata::from_path_following(path)?
        } else {
            EntryMetadata::from_path(path)?
        }
        .ok_or_else(|| VaultError::UnsupportedFileType(path.display().to_string()))?;

        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| VaultError::InvalidPath(path.display().to_string()))?;
        let mut archive_path = PathBuf::from(&self.root_name);
        if !relative.as_os_str().is_empty() {
            archive_path.push(relative);
        }

        Ok(TreeEntry {
            path: path.to_path_buf(),
            archive_path,
            metadata,
        })
    }
}

impl Iterator for TreeWalk {
    type Item = Result<TreeEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next()?;
        Some(
            next.map_err(|e| VaultError::Io(e.into()))
                .and_then(|entry| self.entry(entry)),
        )
    }
}

/// Name the root is stored under. Paths like `.` or `data/..` have no file
/// name of their own and are resolved on disk first.
fn root_name(root: &Path) -> Result<OsString> {
    if let Some(name) = Path::new(&clean_path(root)).file_name() {
        return Ok(name.to_os_string());
    }

    let resolved = std::fs::canonicalize(root)?;
    resolved
        .file_name()
        .map(|name| name.to_os_string())
        .ok_or_else(|| VaultError::InvalidPath(format!("cannot archive {}", root.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::metadata::EntryKind;
    use std::fs;
    use tempfile::TempDir;

    fn archive_paths(root: &Path) -> Result<Vec<String>> {
        TreeWalk::new(root)?
            .map(|entry| entry.map(|e| e.archive_path.to_string_lossy().into_owned()))
            .collect()
    }

    #[test]
    fn test_walk_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("empty");
        fs::create_dir(&root)?;

        assert_eq!(archive_paths(&root)?, vec!["empty"]);
        Ok(())
    }

    #[test]
    fn test_walk_is_sorted_depth_first() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("config");
        fs::create_dir_all(root.join("nested"))?;
        fs::create_dir_all(root.join("a-dir"))?;
        fs::write(root.join("zeta.txt"), b"z")?;
        fs::write(root.join("alpha.txt"), b"a")?;
        fs::write(root.join("nested/file2.txt"), b"world")?;

        assert_eq!(
            archive_paths(&root)?,
            vec![
                "config",
                "config/a-dir",
                "config/alpha.txt",
                "config/nested",
                "config/nested/file2.txt",
                "config/zeta.txt",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_walk_trailing_slash_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("data");
        fs::create_dir(&root)?;
        fs::write(root.join("f"), b"x")?;

        let with_slash = PathBuf::from(format!("{}/", root.display()));
        assert_eq!(archive_paths(&with_slash)?, vec!["data", "data/f"]);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_not_followed() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        let outside = temp_dir.path().join("outside");
        fs::create_dir(&root)?;
        fs::create_dir(&outside)?;
        fs::write(outside.join("secret"), b"s")?;
        std::os::unix::fs::symlink(&outside, root.join("link"))?;

        let entries: Vec<TreeEntry> = TreeWalk::new(&root)?.collect::<Result<_>>()?;

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].metadata.kind,
            EntryKind::Symlink {
                target: outside.clone()
            }
        );
        Ok(())
    }

    #[test]
    fn test_missing_root_yields_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut walk = TreeWalk::new(&temp_dir.path().join("missing"))?;

        assert!(matches!(walk.next(), Some(Err(VaultError::Io(_)))));
        Ok(())
    }
}
