use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{KeySource, KeyfileSource};
use crate::errors::{Result, VaultError};
use crate::vault::VaultOptions;

/// Which platform capability supplies the master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeySourceKind {
    /// A 32-byte key file with owner-only permissions.
    Keyfile,
    /// The OS keyring (requires the `keyring-store` feature).
    Keyring,
}

/// Project-level configuration, loaded from `.cryptovault.toml`.
///
/// Every field has a sensible default so CryptoVault works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Identifier handed to the key source (keyring account name).
    #[serde(default = "default_vault_id")]
    pub vault_id: String,

    /// Directory (relative to project root) holding the vault.
    #[serde(default = "default_vault_dir")]
    pub vault_dir: String,

    /// Where the master key comes from.
    #[serde(default = "default_key_source")]
    pub key_source: KeySourceKind,

    /// Key file path (relative to project root).  Defaults to
    /// `<vault_dir>/master.key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<String>,

    /// Delay before retrying a transient write failure, in milliseconds.
    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,

    /// Worker threads for the vault's own I/O runtime.
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_vault_id() -> String {
    "CryptoVault_KeyAlias_v1".to_string()
}

fn default_vault_dir() -> String {
    ".cryptovault".to_string()
}

fn default_key_source() -> KeySourceKind {
    KeySourceKind::Keyfile
}

fn default_write_retry_delay_ms() -> u64 {
    50
}

fn default_io_threads() -> usize {
    2
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_id: default_vault_id(),
            vault_dir: default_vault_dir(),
            key_source: default_key_source(),
            keyfile: None,
            write_retry_delay_ms: default_write_retry_delay_ms(),
            io_threads: default_io_threads(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the project root.
    pub const FILE_NAME: &'static str = ".cryptovault.toml";

    /// Load settings from `<project_dir>/.cryptovault.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            VaultError::ConfigError(format!("Failed to read {}: {e}", config_path.display()))
        })?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            VaultError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        if settings.vault_id.is_empty() {
            return Err(VaultError::ConfigError("vault_id cannot be empty".into()));
        }

        Ok(settings)
    }

    /// Full path of the vault directory.
    ///
    /// Example: `project_dir/.cryptovault`
    pub fn vault_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.vault_dir)
    }

    /// Full path of the key file used by the `keyfile` source.
    pub fn keyfile_path(&self, project_dir: &Path) -> PathBuf {
        match &self.keyfile {
            Some(path) => project_dir.join(path),
            None => self.vault_path(project_dir).join("master.key"),
        }
    }

    /// Build the configured key source.
    pub fn key_source(&self, project_dir: &Path) -> Result<Box<dyn KeySource>> {
        match self.key_source {
            KeySourceKind::Keyfile => Ok(Box::new(KeyfileSource::new(self.keyfile_path(project_dir)))),
            #[cfg(feature = "keyring-store")]
            KeySourceKind::Keyring => Ok(Box::new(crate::keyring::KeyringSource::new())),
            #[cfg(not(feature = "keyring-store"))]
            KeySourceKind::Keyring => Err(VaultError::ConfigError(
                "key_source = \"keyring\" requires building with the `keyring-store` feature"
                    .into(),
            )),
        }
    }

    /// Convert the runtime settings into vault options.
    pub fn vault_options(&self) -> VaultOptions {
        VaultOptions {
            io_threads: self.io_threads,
            write_retry_delay: Duration::from_millis(self.write_retry_delay_ms),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
