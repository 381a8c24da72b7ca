//! Archive extraction with path containment checks.

use crate::fs::metadata::apply_mode;
use crate::utils::{Result, VaultError};
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, info};

/// Extract a gzip-compressed tar stream into `dest`.
///
/// With `entry_filter` set, only the first entry whose stored path equals the
/// filter is extracted and scanning stops there; if no entry matches the
/// result is [`VaultError::EntryNotFound`] and nothing is written.
///
/// An empty filter is the same as no filter.
///
/// Every entry path must resolve inside `dest`. Entry types other than
/// directories, regular files and symlinks are skipped.
pub fn extract_archive<R: Read>(reader: R, dest: &Path, entry_filter: Option<&str>) -> Result<()> {
    let entry_filter = entry_filter.filter(|f| !f.is_empty());
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut extractor = Extractor::new(dest);
    let mut found = false;

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;

        if let Some(filter) = entry_filter {
            if entry.path_bytes().as_ref() != filter.as_bytes() {
                continue;
            }
        }
        found = true;

        extractor.unpack(&mut entry)?;

        if entry_filter.is_some() {
            break;
        }
    }

    if let Some(filter) = entry_filter {
        if !found {
            return Err(VaultError::EntryNotFound(filter.to_string()));
        }
    }

    extractor.finish()?;
    info!("Extracted {} entries into {}", extractor.written, dest.display());
    Ok(())
}

struct Extractor {
    dest: PathBuf,

    /// Resolved destination, computed on the first write
    canonical_dest: Option<PathBuf>,

    /// Directory modes, applied once their contents are in place
    deferred_modes: Vec<(PathBuf, u32)>,

    written: usize,
}

impl Extractor {
    fn new(dest: &Path) -> Self {
        Self {
            dest: dest.to_path_buf(),
            canonical_dest: None,
            deferred_modes: Vec::new(),
            written: 0,
        }
    }

    fn unpack<R: Read>(&mut self, entry: &mut tar::Entry<'_, R>) -> Result<()> {
        let stored = entry.path().map_err(corrupt)?.into_owned();
        let entry_type = entry.header().entry_type();
        let is_dir = entry_type == EntryType::Directory;

        let relative = contained_path(&stored, is_dir)?;
        let target = self.dest.join(&relative);

        match entry_type {
            EntryType::Directory => {
                self.prepare_dirs(&relative)?;
                if !relative.as_os_str().is_empty() {
                    let mode = entry.header().mode().map_err(corrupt)?;
                    self.deferred_modes.push((target, mode));
                }
            }
            EntryType::Regular => {
                self.prepare_parent(&relative)?;
                remove_non_dir(&target)?;

                let mode = entry.header().mode().map_err(corrupt)?;
                let mut file = fs::File::create(&target)?;
                io::copy(entry, &mut file)?;
                drop(file);
                apply_mode(&target, mode)?;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(corrupt)?
                    .ok_or_else(|| VaultError::Archive(format!("symlink {} has no target", stored.display())))?
                    .into_owned();

                self.prepare_parent(&relative)?;
                remove_non_dir(&target)?;
                make_symlink(&link, &target)?;
            }
            other => {
                debug!("Skipping unsupported entry {} ({:?})", stored.display(), other);
                return Ok(());
            }
        }

        self.written += 1;
        Ok(())
    }

    fn prepare_parent(&mut self, relative: &Path) -> Result<()> {
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));
        self.prepare_dirs(parent)
    }

    /// Create `relative` below the destination one component at a time,
    /// refusing to pass through a symlink that leads outside of it.
    fn prepare_dirs(&mut self, relative: &Path) -> Result<()> {
        fs::create_dir_all(&self.dest)?;
        let root = self.canonical_dest()?;

        let mut current = self.dest.clone();
        for component in relative.components() {
            current.push(component);

            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let resolved = fs::canonicalize(&current)?;
                    if !resolved.starts_with(&root) {
                        return Err(VaultError::InvalidPath(format!(
                            "{} leads outside of {}",
                            current.display(),
                            self.dest.display()
                        )));
                    }
                }
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(VaultError::Io(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} exists and is not a directory", current.display()),
                    )));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&current)?,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    fn canonical_dest(&mut self) -> Result<PathBuf> {
        if let Some(root) = &self.canonical_dest {
            return Ok(root.clone());
        }

        let root = fs::canonicalize(&self.dest)?;
        self.canonical_dest = Some(root.clone());
        Ok(root)
    }

    /// Apply directory modes deepest first.
    fn finish(&mut self) -> Result<()> {
        for (path, mode) in self.deferred_modes.drain(..).rev() {
            apply_mode(&path, mode)?;
        }
        Ok(())
    }
}

/// Resolve an entry path to a path relative to the destination.
///
/// Absolute paths, drive prefixes and `..` segments that climb above the
/// destination are rejected. Only a directory entry may resolve to the
/// destination itself.
fn contained_path(stored: &Path, is_dir: bool) -> Result<PathBuf> {
    let invalid = || VaultError::InvalidPath(stored.display().to_string());

    let mut relative = PathBuf::new();
    let mut depth = 0usize;

    for component in stored.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return Err(invalid()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(invalid());
                }
                relative.pop();
                depth -= 1;
            }
            Component::Normal(name) => {
                relative.push(name);
                depth += 1;
            }
        }
    }

    if depth == 0 && !is_dir {
        return Err(invalid());
    }

    Ok(relative)
}

/// Remove a file or symlink occupying `path` so it is replaced rather than
/// written through.
fn remove_non_dir(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn make_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn make_symlink(link: &Path, target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot create symlink {} -> {}", target.display(), link.display()),
    ))
}

fn corrupt(e: io::Error) -> VaultError {
    VaultError::Archive(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contained_path() {
        assert_eq!(
            contained_path(Path::new("config/file.txt"), false).unwrap(),
            PathBuf::from("config/file.txt")
        );
        assert_eq!(
            contained_path(Path::new("./config/../other"), false).unwrap(),
            PathBuf::from("other")
        );
        assert_eq!(contained_path(Path::new("."), true).unwrap(), PathBuf::new());
    }

    #[test]
    fn test_contained_path_rejects_escapes() {
        for path in ["../evil", "a/../../evil", "/etc/passwd", "."] {
            assert!(
                matches!(contained_path(Path::new(path), false), Err(VaultError::InvalidPath(_))),
                "{} should be rejected",
                path
            );
        }
    }
}
