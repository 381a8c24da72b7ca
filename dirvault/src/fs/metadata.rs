//! File metadata captured for archive entries.
//!
//! Only fields that stay stable while the content is unchanged are kept:
//! mode bits, ownership and the modification time in whole seconds. Access
//! and change times, device and inode numbers are never recorded.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Mode used for symlink entries, whose own permission bits are meaningless.
pub const SYMLINK_MODE: u32 = 0o777;

/// What kind of node an entry describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File { size: u64 },
    Symlink { target: PathBuf },
}

/// Stable metadata for one filesystem node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub kind: EntryKind,

    /// Permission bits (`mode & 0o7777`)
    pub mode: u32,

    pub uid: u64,
    pub gid: u64,

    /// Last modified time (seconds since Unix epoch)
    pub mtime: u64,
}

impl EntryMetadata {
    /// Read metadata for `path` without following a final symlink.
    ///
    /// Returns `Ok(None)` for node types that have no archive representation
    /// (fifos, sockets, devices).
    pub fn from_path(path: &Path) -> std::io::Result<Option<Self>> {
        Self::read(path, fs::symlink_metadata(path)?)
    }

    /// Like [`EntryMetadata::from_path`] but resolves a symlinked path first.
    /// Used for the archive root, which is always descended into.
    pub fn from_path_following(path: &Path) -> std::io::Result<Option<Self>> {
        Self::read(path, fs::metadata(path)?)
    }

    fn read(path: &Path, metadata: fs::Metadata) -> std::io::Result<Option<Self>> {
        let file_type = metadata.file_type();

        let kind = if file_type.is_symlink() {
            EntryKind::Symlink {
                target: fs::read_link(path)?,
            }
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File {
                size: metadata.len(),
            }
        } else {
            return Ok(None);
        };

        let mtime = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mode = match kind {
            EntryKind::Symlink { .. } => SYMLINK_MODE,
            _ => permission_bits(&metadata),
        };
        let (uid, gid) = ownership(&metadata);

        Ok(Some(Self {
            kind,
            mode,
            uid,
            gid,
            mtime,
        }))
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

#[cfg(unix)]
fn ownership(metadata: &fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.uid() as u64, metadata.gid() as u64)
}

#[cfg(not(unix))]
fn ownership(_metadata: &fs::Metadata) -> (u64, u64) {
    (0, 0)
}

/// Apply archived permission bits to a restored file or directory.
#[cfg(unix)]
pub fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
pub fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_file_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = EntryMetadata::from_path(temp_file.path())?.unwrap();

        assert_eq!(metadata.kind, EntryKind::File { size: 12 });
        assert!(metadata.mtime > 0);

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_is_not_followed() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink("missing-target", &link)?;

        let metadata = EntryMetadata::from_path(&link)?.unwrap();

        assert_eq!(
            metadata.kind,
            EntryKind::Symlink {
                target: PathBuf::from("missing-target")
            }
        );
        assert_eq!(metadata.mode, SYMLINK_MODE);

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_permissions_roundtrip() -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_file = NamedTempFile::new()?;
        apply_mode(temp_file.path(), 0o640)?;

        let metadata = EntryMetadata::from_path(temp_file.path())?.unwrap();
        assert_eq!(metadata.mode, 0o640);
        assert_eq!(
            fs::metadata(temp_file.path())?.permissions().mode() & 0o777,
            0o640
        );

        Ok(())
    }
}
