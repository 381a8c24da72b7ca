//! Backup executor - decides per directory whether a new snapshot is needed
//! and uploads it.
//!
//! Each configured directory is archived into a spooled temporary file while
//! its SHA-256 digest is computed. When the digest matches the one recorded
//! for the directory's slug the directory is skipped; otherwise the archive is
//! uploaded and the new digest recorded.

pub mod checksums;

pub use checksums::DigestMap;

use crate::archive::create_archive;
use crate::naming::{slug_of, snapshot_key};
use crate::storage::{BlobStore, StreamReader};
use crate::transfer::{format_bytes, format_rate};
use crate::utils::{Result, VaultError};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one directory during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Uploaded { key: String, digest: String },
    /// Archive digest matched the recorded one
    Skipped,
    /// Dry run: would have uploaded to `key`
    Planned { key: String },
    Failed { reason: String },
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryOutcome {
    pub directory: PathBuf,
    pub outcome: Outcome,
}

/// Per-directory outcomes of a run, in configuration order
#[derive(Debug, Default)]
pub struct BackupReport {
    pub outcomes: Vec<DirectoryOutcome>,
}

impl BackupReport {
    fn push(&mut self, directory: &Path, outcome: Outcome) {
        self.outcomes.push(DirectoryOutcome {
            directory: directory.to_path_buf(),
            outcome,
        });
    }

    pub fn outcome(&self, directory: &Path) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.directory == directory)
            .map(|o| &o.outcome)
    }

    /// Directories that failed, as displayed paths
    pub fn failed(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_failed())
            .map(|o| o.directory.display().to_string())
            .collect()
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(VaultError::BackupFailed(failed))
        }
    }
}

/// An archive written to a temporary file, with its digest and size.
/// The file is removed when this is dropped.
struct SpooledArchive {
    file: NamedTempFile,
    digest: String,
    len: u64,
}

/// Writer that hashes every byte it passes through
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Flush and return the lowercase hex digest and byte count
    fn finish(mut self) -> io::Result<(String, u64)> {
        self.inner.flush()?;
        Ok((hex::encode(self.hasher.finalize()), self.written))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn spool_archive(root: &Path, spool_dir: Option<&Path>) -> Result<SpooledArchive> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("dirvault-").suffix(".tar.gz");
    let mut file = match spool_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            builder.tempfile_in(dir)?
        }
        None => builder.tempfile()?,
    };

    let writer = HashingWriter::new(BufWriter::new(file.as_file_mut()));
    let (digest, len) = create_archive(writer, root)?.finish()?;

    Ok(SpooledArchive { file, digest, len })
}

/// Main backup executor
pub struct BackupExecutor {
    store: Arc<dyn BlobStore>,
    hostname: String,
    checksums_path: PathBuf,
    spool_dir: Option<PathBuf>,
    dry_run: bool,
    cancel_token: CancellationToken,
}

impl BackupExecutor {
    pub fn new(
        store: Arc<dyn BlobStore>,
        hostname: impl Into<String>,
        checksums_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            hostname: hostname.into(),
            checksums_path: checksums_path.into(),
            spool_dir: None,
            dry_run: false,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Report what would be uploaded without touching the store or the
    /// digest map
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Spool archives under `spool_dir` instead of the system temp dir
    pub fn with_spool_dir(mut self, spool_dir: Option<PathBuf>) -> Self {
        self.spool_dir = spool_dir;
        self
    }

    /// Back up `directories` in order. Every snapshot key of the run uses
    /// `now`. Only failing to read the digest map aborts the run; everything
    /// else is reported per directory.
    pub async fn execute(&self, directories: &[PathBuf], now: DateTime<Utc>) -> Result<BackupReport> {
        let start_time = Instant::now();
        let mut digests = DigestMap::load(&self.checksums_path)?;

        info!(
            "Starting backup of {} directories ({} recorded digests{})",
            directories.len(),
            digests.len(),
            if self.dry_run { ", dry run" } else { "" }
        );

        let mut report = BackupReport::default();
        for directory in directories {
            if self.cancel_token.is_cancelled() {
                warn!("Skipping {}: backup cancelled", directory.display());
                report.push(
                    directory,
                    Outcome::Failed {
                        reason: VaultError::Cancelled.to_string(),
                    },
                );
                continue;
            }

            let outcome = match self.backup_directory(directory, now, &mut digests).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Backup of {} failed: {}", directory.display(), e);
                    Outcome::Failed { reason: e.to_string() }
                }
            };
            report.push(directory, outcome);
        }

        info!(
            "Backup finished in {}s: {} uploaded, {} unchanged, {} planned, {} failed",
            start_time.elapsed().as_secs(),
            report.count(|o| matches!(o, Outcome::Uploaded { .. })),
            report.count(|o| matches!(o, Outcome::Skipped)),
            report.count(|o| matches!(o, Outcome::Planned { .. })),
            report.count(Outcome::is_failed),
        );

        Ok(report)
    }

    async fn backup_directory(
        &self,
        directory: &Path,
        now: DateTime<Utc>,
        digests: &mut DigestMap,
    ) -> Result<Outcome> {
        match tokio::fs::metadata(directory).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(VaultError::NotADirectory(directory.display().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VaultError::NotADirectory(directory.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let slug = slug_of(directory);
        let root = directory.to_path_buf();
        let spool_dir = self.spool_dir.clone();
        let spool = tokio::task::spawn_blocking(move || spool_archive(&root, spool_dir.as_deref()))
            .await
            .map_err(io::Error::other)??;

        debug!(
            "Archived {}: {} sha256:{}",
            directory.display(),
            format_bytes(spool.len),
            spool.digest
        );

        if digests.get(&slug) == Some(spool.digest.as_str()) {
            info!("{} unchanged, skipping", directory.display());
            return Ok(Outcome::Skipped);
        }

        let key = snapshot_key(&self.hostname, directory, &now);
        if self.dry_run {
            info!(
                "[dry-run] Would upload {} ({}) to {}",
                directory.display(),
                format_bytes(spool.len),
                self.store.location(&key)
            );
            return Ok(Outcome::Planned { key });
        }

        self.upload(directory, &key, &spool).await?;

        digests.record(slug, spool.digest.clone());
        if let Err(e) = digests.save(&self.checksums_path) {
            warn!(
                "Failed to save checksums to {}: {}",
                self.checksums_path.display(),
                e
            );
        }

        Ok(Outcome::Uploaded {
            key,
            digest: spool.digest,
        })
    }

    async fn upload(&self, directory: &Path, key: &str, spool: &SpooledArchive) -> Result<()> {
        let reader: StreamReader = Box::new(tokio::fs::File::from_std(spool.file.reopen()?));
        let started = Instant::now();

        tokio::select! {
            result = self.store.put(key, reader, spool.len) => result?,
            _ = self.cancel_token.cancelled() => {
                info!("Upload cancelled for {}", directory.display());
                return Err(VaultError::Cancelled);
            }
        }

        info!(
            "Uploaded {} ({}) to {} at {}",
            directory.display(),
            format_bytes(spool.len),
            self.store.location(key),
            format_rate(spool.len, started.elapsed())
        );
        Ok(())
    }
}
