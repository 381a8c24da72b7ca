//! Filesystem traversal and metadata for archive entries.

pub mod metadata;
pub mod walker;

pub use metadata::{EntryKind, EntryMetadata};
pub use walker::{TreeEntry, TreeWalk};
