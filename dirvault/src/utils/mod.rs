//! Utility modules for dirvault.

pub mod errors;
pub mod logger;

pub use errors::{Result, StoreError, VaultError};
