//! Deterministic tar+gzip archive construction.

use crate::fs::{EntryKind, TreeEntry, TreeWalk};
use crate::utils::Result;
use flate2::{Compression, GzBuilder};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tar::{Builder, EntryType, Header};
use tracing::debug;

/// Write a gzip-compressed tar archive of `root` into `writer`.
///
/// Entries are named relative to the parent of `root`, in sorted depth-first
/// order. Header fields are limited to path, type, mode, ownership, size and
/// mtime, and the gzip header carries no timestamp or file name, so archiving
/// an unchanged tree again produces the same bytes.
///
/// Any unreadable node aborts the whole archive. Returns the inner writer
/// once the gzip trailer has been written.
pub fn create_archive<W: Write>(writer: W, root: &Path) -> Result<W> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(writer, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut count = 0usize;
    for entry in TreeWalk::new(root)? {
        append_entry(&mut builder, &entry?)?;
        count += 1;
    }

    let encoder = builder.into_inner()?;
    let writer = encoder.finish()?;

    debug!("Archived {} entries from {}", count, root.display());
    Ok(writer)
}

fn append_entry<W: Write>(builder: &mut Builder<W>, entry: &TreeEntry) -> Result<()> {
    let metadata = &entry.metadata;

    let mut header = Header::new_gnu();
    header.set_mode(metadata.mode);
    header.set_uid(metadata.uid);
    header.set_gid(metadata.gid);
    header.set_mtime(metadata.mtime);

    match &metadata.kind {
        EntryKind::Directory => {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &entry.archive_path, io::empty())?;
        }
        EntryKind::File { size } => {
            header.set_entry_type(EntryType::Regular);
            header.set_size(*size);
            let file = File::open(&entry.path)?;
            builder.append_data(&mut header, &entry.archive_path, SizedReader::new(file, *size))?;
        }
        EntryKind::Symlink { target } => {
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &entry.archive_path, target)?;
        }
    }

    Ok(())
}

/// Reads exactly `remaining` bytes from a file whose size was recorded in the
/// header. Stops at that length if the file grew; fails if it shrank, since
/// the tar framing would otherwise be corrupt.
struct SizedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> SizedReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read> Read for SizedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let limit = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..limit])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while it was being archived",
            ));
        }

        self.remaining -= n as u64;
        Ok(n)
    }
}
