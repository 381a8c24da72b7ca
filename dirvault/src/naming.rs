//! Slug and snapshot key naming.
//!
//! Remote objects are addressed as `{hostname}/{slug}/{timestamp}.tar.gz`.
//! The timestamp layout is fixed-width and UTC, so for one hostname and slug
//! the lexical order of keys is the chronological order of the snapshots.

use crate::utils::{Result, VaultError};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Component, Path};

/// Timestamp layout used inside snapshot keys (no colons, path-safe).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Suffix shared by every snapshot key.
pub const SNAPSHOT_SUFFIX: &str = ".tar.gz";

/// Lexically normalize a path the way `path/filepath.Clean`-style helpers do:
/// drop `.` segments, resolve `..` against preceding segments, collapse
/// repeated separators and remove trailing ones.
///
/// `..` at the root of an absolute path is dropped; leading `..` segments of a
/// relative path are kept. An empty result becomes `.`.
pub fn clean_path(path: &Path) -> String {
    let mut rooted = false;
    let mut parts: Vec<String> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => {
                parts.push(prefix.as_os_str().to_string_lossy().into_owned());
            }
            Component::RootDir => rooted = true,
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push("..".to_string()),
            },
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Derive the slug for a local directory.
///
/// `/opt/homeassistant/config` becomes `opt-homeassistant-config`. Paths that
/// already contain `-` can collide (`/a-b` and `/a/b`); that is accepted.
pub fn slug_of(path: impl AsRef<Path>) -> String {
    let cleaned = clean_path(path.as_ref());
    let trimmed = cleaned.strip_prefix('/').unwrap_or(&cleaned);
    trimmed.replace('/', "-")
}

/// Format a UTC timestamp in the snapshot key layout.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Build the full remote key for one snapshot of `path`.
pub fn snapshot_key(hostname: &str, path: impl AsRef<Path>, timestamp: &DateTime<Utc>) -> String {
    key_for_timestamp(hostname, path, &format_timestamp(timestamp))
}

/// Build a key from an already formatted timestamp.
pub fn key_for_timestamp(hostname: &str, path: impl AsRef<Path>, timestamp: &str) -> String {
    format!("{}/{}/{}{}", hostname, slug_of(path), timestamp, SNAPSHOT_SUFFIX)
}

/// Listing prefix for a host, or for one directory of that host.
pub fn snapshot_prefix(hostname: &str, path: Option<&Path>) -> String {
    match path {
        Some(path) => format!("{}/{}/", hostname, slug_of(path)),
        None => format!("{}/", hostname),
    }
}

/// Normalize a user supplied snapshot timestamp to the key layout.
///
/// Accepts the key layout itself (`2026-02-11T03-00-00Z`) or RFC 3339
/// (`2026-02-11T03:00:00Z`, any offset).
pub fn parse_snapshot_timestamp(text: &str) -> Result<String> {
    let text = text.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
        return Ok(format_timestamp(&naive.and_utc()));
    }

    if let Ok(zoned) = DateTime::parse_from_rfc3339(text) {
        return Ok(format_timestamp(&zoned.with_timezone(&Utc)));
    }

    Err(VaultError::InvalidSnapshot(text.to_string()))
}

/// The timestamp component of a snapshot key, if it has the expected shape.
pub fn snapshot_timestamp(key: &str) -> Option<&str> {
    key.rsplit('/').next()?.strip_suffix(SNAPSHOT_SUFFIX)
}
