//! Persisted slug → archive digest map used to skip unchanged directories.
//!
//! Serialized as a flat JSON object, e.g.
//! `{ "opt-homeassistant-config": "3b0c…" }`, keys sorted for diffability.

use crate::utils::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigestMap {
    digests: BTreeMap<String, String>,
}

impl DigestMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the map from `path`. A missing file is an empty map; any other
    /// read or parse failure is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&data)?)
    }

    /// Persist the full map. The data goes to a temporary file next to
    /// `path` which is then renamed over it, so readers never see a partial
    /// write.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');

        let mut temp = tempfile::Builder::new()
            .prefix(".checksums-")
            .suffix(".tmp")
            .tempfile_in(parent)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;

        Ok(())
    }

    pub fn get(&self, slug: &str) -> Option<&str> {
        self.digests.get(slug).map(String::as_str)
    }

    /// Record the digest of a confirmed upload.
    pub fn record(&mut self, slug: impl Into<String>, digest: impl Into<String>) {
        self.digests.insert(slug.into(), digest.into());
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}
