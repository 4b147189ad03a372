//! `vault.json`: which key a vault directory was created with.
//!
//! The file holds a key check tag, never key bytes.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::format::{base64_decode, base64_encode, write_atomic};
use crate::errors::{Result, VaultError};

/// File name of the metadata inside the vault directory.
pub const META_FILE: &str = "vault.json";

/// Current metadata format version.
const META_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultMetadata {
    pub format_version: u8,

    /// Identifier handed to the key source.
    pub vault_id: String,

    /// HMAC-SHA256 over a fixed label under the master key.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub key_check: Vec<u8>,

    pub created_at: DateTime<Utc>,
}

impl VaultMetadata {
    pub fn new(vault_id: &str, key_check: Vec<u8>) -> Self {
        Self {
            format_version: META_VERSION,
            vault_id: vault_id.to_string(),
            key_check,
            created_at: Utc::now(),
        }
    }

    /// Read metadata from `path`, or `None` if the vault has none yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VaultError::storage(format!("reading {}", path.display()), e)),
        };

        let meta: Self = serde_json::from_slice(&contents).map_err(|e| {
            VaultError::SerializationError(format!("{}: {e}", path.display()))
        })?;

        if meta.format_version != META_VERSION {
            return Err(VaultError::SerializationError(format!(
                "unsupported metadata version {}, expected {META_VERSION}",
                meta.format_version
            )));
        }

        Ok(Some(meta))
    }

    /// Write metadata atomically to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| VaultError::storage(format!("creating {}", parent.display()), e))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| VaultError::SerializationError(format!("metadata: {e}")))?;
        write_atomic(path, &json)
    }
}
