//! Deterministic tar+gzip archives of directory trees.
//!
//! [`create_archive`] turns a directory into a reproducible byte stream and
//! [`extract_archive`] materializes such a stream back onto disk, optionally
//! restricted to a single entry.

pub mod create;
pub mod extract;

pub use create::create_archive;
pub use extract::extract_archive;
