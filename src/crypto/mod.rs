//! Cryptographic primitives for CryptoVault.
//!
//! This module provides:
//! - AES-256-GCM encryption and decryption (`encryption`)
//! - The master key type and HKDF sub-key derivation (`keys`)
//! - The `KeyManager` and the `KeySource` trait (`key_manager`)
//! - A key-file backed `KeySource` (`keyfile`)

pub mod encryption;
pub mod key_manager;
pub mod keyfile;
pub mod keys;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{encrypt, decrypt, KeyManager, ...};
pub use encryption::{decrypt, encrypt, Sealed, NONCE_LEN, TAG_LEN};
pub use key_manager::{KeyManager, KeySource};
pub use keyfile::KeyfileSource;
pub use keys::MasterKey;
