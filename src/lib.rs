//! CryptoVault: a local encrypted key-value vault for string secrets.
//!
//! Secrets are encrypted with AES-256-GCM under a per-record key derived
//! from a master key, and each one is written atomically to its own file.
//! Plaintext never touches the disk.
//!
//! ```no_run
//! use cryptovault::crypto::{KeyManager, KeyfileSource};
//! use cryptovault::vault::Vault;
//!
//! # fn main() -> cryptovault::errors::Result<()> {
//! let keys = KeyManager::new("my-app", KeyfileSource::new(".cryptovault/master.key"));
//! let vault = Vault::open(".cryptovault", keys)?;
//!
//! vault.put_string_blocking("api_token", "s3cr3t")?;
//! assert_eq!(vault.get_string_blocking("api_token")?, "s3cr3t");
//!
//! // Off the caller's thread:
//! let value = vault.get_string_future("api_token").wait()?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod vault;

#[cfg(feature = "keyring-store")]
pub mod keyring;

pub use errors::{Result, VaultError};
pub use vault::Vault;
