//! The Key Manager: one master key per vault instance.
//!
//! `KeyManager` asks a `KeySource` for the key exactly once and caches
//! it for the rest of the process.  Concurrent first calls collapse into
//! a single attempt (`OnceCell::get_or_try_init` blocks the other
//! callers until the first one finishes).  A failed attempt is not
//! cached, so a later call can succeed once the source is reachable.
//!
//! When a metadata path is configured, the freshly obtained key is
//! bound to the vault: an existing `vault.json` must carry a matching
//! key check tag, and a missing one is written.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use super::keys::MasterKey;
use crate::errors::{Result, VaultError};
use crate::vault::meta::VaultMetadata;

/// A platform capability that returns the vault's symmetric key,
/// creating it on first use.
///
/// Implementations must report any access problem as
/// `VaultError::KeyUnavailable` and must never log key bytes.
pub trait KeySource: Send + Sync {
    /// Short name used in log events (e.g. "keyfile").
    fn name(&self) -> &str;

    /// Return the key stored under `vault_id`, generating and storing a
    /// new one if none exists.
    fn get_or_create(&self, vault_id: &str) -> Result<MasterKey>;
}

impl<T: KeySource + ?Sized> KeySource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get_or_create(&self, vault_id: &str) -> Result<MasterKey> {
        (**self).get_or_create(vault_id)
    }
}

/// Process-scoped holder of the master key.
pub struct KeyManager {
    vault_id: String,
    source: Box<dyn KeySource>,
    metadata_path: Option<PathBuf>,
    key: OnceCell<Arc<MasterKey>>,
}

impl KeyManager {
    /// Build a manager that will fetch its key from `source`.
    pub fn new(vault_id: impl Into<String>, source: impl KeySource + 'static) -> Self {
        Self {
            vault_id: vault_id.into(),
            source: Box::new(source),
            metadata_path: None,
            key: OnceCell::new(),
        }
    }

    /// Bind the key to the vault metadata file at `path`.
    pub fn with_metadata(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_path = Some(path.into());
        self
    }

    /// The vault identifier passed to the key source.
    pub fn vault_id(&self) -> &str {
        &self.vault_id
    }

    /// Return the master key, creating it on the first call.
    pub fn get_key(&self) -> Result<Arc<MasterKey>> {
        self.key
            .get_or_try_init(|| {
                debug!(source = self.source.name(), vault_id = %self.vault_id, "Loading master key");
                let key = self.source.get_or_create(&self.vault_id)?;
                self.bind(&key)?;
                info!(source = self.source.name(), vault_id = %self.vault_id, "Master key ready");
                Ok(Arc::new(key))
            })
            .cloned()
    }

    /// Whether the key has already been loaded.
    pub fn is_loaded(&self) -> bool {
        self.key.get().is_some()
    }

    fn bind(&self, key: &MasterKey) -> Result<()> {
        let Some(path) = &self.metadata_path else {
            return Ok(());
        };

        match VaultMetadata::load(path)? {
            Some(meta) => {
                if meta.vault_id != self.vault_id {
                    return Err(VaultError::KeyUnavailable(format!(
                        "vault at {} belongs to '{}', not '{}'",
                        path.display(),
                        meta.vault_id,
                        self.vault_id
                    )));
                }
                key.verify_key_check(&meta.key_check)
            }
            None => {
                let meta = VaultMetadata::new(&self.vault_id, key.key_check()?);
                meta.save(path)?;
                info!(path = %path.display(), "Created vault metadata");
                Ok(())
            }
        }
    }
}
