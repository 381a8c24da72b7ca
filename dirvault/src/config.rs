//! Configuration management for dirvault.
//!
//! Loads configuration from a TOML file:
//!
//! ```toml
//! hostname = "cherry"
//! directories = ["/opt/homeassistant/config", "/opt/pihole/etc-pihole"]
//!
//! [storage]
//! type = "http"
//! endpoint = "https://objects.example.net"
//! bucket = "backups"
//!
//! [log]
//! level = "info"
//! timestamps = false
//! ```
//!
//! Credentials for the storage backend come from the environment only, and
//! only the `http` backend needs them: `DIRVAULT_ACCESS_KEY_ID` and
//! `DIRVAULT_SECRET_ACCESS_KEY` are checked before any work starts when it is
//! configured. The `fs` backend runs without them.

use crate::utils::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/dirvault/config.toml";

/// Environment variable holding the storage access key id
pub const ACCESS_KEY_ENV: &str = "DIRVAULT_ACCESS_KEY_ID";

/// Environment variable holding the storage secret key
pub const SECRET_KEY_ENV: &str = "DIRVAULT_SECRET_ACCESS_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name snapshots are filed under (defaults to the system hostname)
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Directories to back up, in order
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    pub storage: StorageConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// A local directory acting as the bucket
    Fs { root: PathBuf },

    /// An HTTP object gateway
    Http { endpoint: String, bucket: String },
}

impl StorageConfig {
    pub fn needs_credentials(&self) -> bool {
        matches!(self, StorageConfig::Http { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Prefix lines with timestamps (turn off under journald)
    #[serde(default = "default_timestamps")]
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_timestamps(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Digest map location (default: `checksums.json` next to the config file)
    #[serde(default)]
    pub checksums_path: Option<PathBuf>,

    /// Where archives are spooled before upload (default: system temp dir)
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timestamps() -> bool {
    true
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("reading config {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| VaultError::Config(format!("parsing config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required field is present and usable
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(VaultError::Config("hostname is required".to_string()));
        }
        if self.hostname.contains('/') {
            return Err(VaultError::Config(format!(
                "hostname {:?} must not contain '/'",
                self.hostname
            )));
        }
        if self.directories.is_empty() {
            return Err(VaultError::Config(
                "at least one directory is required".to_string(),
            ));
        }

        match &self.storage {
            StorageConfig::Fs { root } if root.as_os_str().is_empty() => {
                Err(VaultError::Config("storage.root is required".to_string()))
            }
            StorageConfig::Http { endpoint, .. } if endpoint.trim().is_empty() => {
                Err(VaultError::Config("storage.endpoint is required".to_string()))
            }
            StorageConfig::Http { bucket, .. } if bucket.trim().is_empty() => {
                Err(VaultError::Config("storage.bucket is required".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Where the digest map lives for a config loaded from `config_path`
    pub fn checksums_path(&self, config_path: &Path) -> PathBuf {
        match &self.state.checksums_path {
            Some(path) => path.clone(),
            None => config_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .join("checksums.json"),
        }
    }

    /// Storage credentials from the environment, if the backend needs them.
    pub fn credentials(&self) -> Result<Option<Credentials>> {
        if self.storage.needs_credentials() {
            Credentials::from_env().map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Access key pair for the storage backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_key_id = lookup(ACCESS_KEY_ENV).filter(|v| !v.is_empty());
        let secret_access_key = lookup(SECRET_KEY_ENV).filter(|v| !v.is_empty());

        match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Self {
                access_key_id,
                secret_access_key,
            }),
            _ => Err(VaultError::Config(format!(
                "{} and {} must be set",
                ACCESS_KEY_ENV, SECRET_KEY_ENV
            ))),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}
