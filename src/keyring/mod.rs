//! OS keyring key source.
//!
//! Keeps the master key in the operating system's secure credential
//! store:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring / KDE Wallet)
//!
//! The key is stored base64-encoded under service `cryptovault` with
//! the vault identifier as the account name.  Every keyring problem,
//! including a locked store, surfaces as `KeyUnavailable`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::info;
use zeroize::Zeroizing;

use crate::crypto::{KeySource, MasterKey};
use crate::errors::{Result, VaultError};

/// Service name used in the OS keyring.
const SERVICE_NAME: &str = "cryptovault";

/// A `KeySource` backed by the OS keyring.
#[derive(Debug, Default, Clone)]
pub struct KeyringSource;

impl KeyringSource {
    pub fn new() -> Self {
        Self
    }
}

fn entry(vault_id: &str) -> Result<keyring::Entry> {
    keyring::Entry::new(SERVICE_NAME, vault_id)
        .map_err(|e| VaultError::KeyUnavailable(format!("failed to create keyring entry: {e}")))
}

impl KeySource for KeyringSource {
    fn name(&self) -> &str {
        "keyring"
    }

    fn get_or_create(&self, vault_id: &str) -> Result<MasterKey> {
        let entry = entry(vault_id)?;

        match entry.get_password() {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                let bytes = Zeroizing::new(BASE64.decode(encoded.as_bytes()).map_err(|_| {
                    VaultError::KeyUnavailable("keyring entry is not a valid key".into())
                })?);
                MasterKey::from_slice(&bytes)
            }
            Err(keyring::Error::NoEntry) => {
                let key = MasterKey::generate();
                let encoded = Zeroizing::new(BASE64.encode(key.as_bytes()));
                entry.set_password(&encoded).map_err(|e| {
                    VaultError::KeyUnavailable(format!("failed to store key in keyring: {e}"))
                })?;
                info!(vault_id, "Stored new master key in OS keyring");
                Ok(key)
            }
            Err(e) => Err(VaultError::KeyUnavailable(format!(
                "failed to read from keyring: {e}"
            ))),
        }
    }
}
