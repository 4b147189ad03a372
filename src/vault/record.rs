//! SecretRecord and EntryMetadata types.
//!
//! A record holds everything needed to decrypt one secret: the
//! ciphertext, the nonce and tag produced by the same encryption call,
//! and the revision number that was authenticated alongside them.
//! Byte fields serialize as base64 strings in JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::format::{base64_decode, base64_encode};

/// The persisted, encrypted form of one secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// The secret's name as given by the caller.
    pub key: String,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub nonce: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub tag: Vec<u8>,

    /// Revision: 1 on first write, +1 on every overwrite.
    pub version: u64,

    /// When this secret was first created.
    pub created_at: DateTime<Utc>,

    /// When this secret was last written.
    pub updated_at: DateTime<Utc>,
}

impl SecretRecord {
    /// Associated data authenticated with the ciphertext.
    ///
    /// Binds the ciphertext to its name and revision.
    pub fn associated_data(key: &str, version: u64) -> Vec<u8> {
        format!("cryptovault:record:v1:{version}:{key}").into_bytes()
    }

    /// Metadata view without any ciphertext.
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            key: self.key.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight metadata about a secret (no encrypted value).
///
/// Returned by `Vault::entries` so callers can display names and
/// timestamps without touching any ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub key: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
