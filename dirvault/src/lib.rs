//! dirvault library
//!
//! Snapshots directories into deterministic tar.gz archives, uploads a new
//! snapshot only when a directory's archive digest changed, and restores
//! snapshots whole or one entry at a time.

pub mod archive;
pub mod config;
pub mod executor;
pub mod fs;
pub mod naming;
pub mod restore;
pub mod shutdown;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupExecutor, BackupReport, Outcome};
pub use restore::Restorer;
pub use utils::errors::{StoreError, VaultError};
pub use utils::Result;
