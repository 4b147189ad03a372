//! AES-256-GCM authenticated encryption.
//!
//! Each call to `encrypt` generates a fresh random 12-byte nonce
//! internally; there is no way to pass one in.  The ciphertext, nonce
//! and 16-byte auth tag are returned as separate fields so the store
//! can persist them side by side.
//!
//! `decrypt` is fail-closed: wrong lengths, a wrong key, wrong
//! associated data, or any flipped bit all yield
//! `VaultError::AuthenticationFailed` and never partial plaintext.

use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce, Tag};
use zeroize::Zeroize;

use crate::errors::{Result, VaultError};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Output of a single encryption call.
///
/// The three parts belong together; a record never mixes parts from
/// different calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Encrypt `plaintext` with a 32-byte `key`, authenticating `aad` too.
pub fn encrypt(key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| VaultError::EncryptionFailed(format!("invalid key length: {e}")))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // Encrypt in place on a copy so the tag comes back detached.
    let mut buffer = plaintext.to_vec();
    let tag = match cipher.encrypt_in_place_detached(&nonce, aad, &mut buffer) {
        Ok(tag) => tag,
        Err(e) => {
            buffer.zeroize();
            return Err(VaultError::EncryptionFailed(format!("encryption error: {e}")));
        }
    };

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&nonce);
    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);

    Ok(Sealed {
        ciphertext: buffer,
        nonce: nonce_bytes,
        tag: tag_bytes,
    })
}

/// Decrypt a ciphertext produced by `encrypt`.
///
/// The nonce and tag are taken as slices because they come straight
/// from disk; anything of the wrong length is rejected before the
/// cipher sees it.
pub fn decrypt(key: &[u8], aad: &[u8], ciphertext: &[u8], nonce: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(VaultError::AuthenticationFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::AuthenticationFailed)?;

    let mut buffer = ciphertext.to_vec();
    if cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            &mut buffer,
            Tag::from_slice(tag),
        )
        .is_err()
    {
        buffer.zeroize();
        return Err(VaultError::AuthenticationFailed);
    }

    Ok(buffer)
}
