//! Master key handling and HKDF-SHA256 sub-key derivation.
//!
//! From the single master key we derive:
//! - A unique **per-record** encryption key for each secret name.
//! - A **key check** tag stored in the vault metadata so a vault can
//!   tell whether a key source handed back the key it was created with.

use std::fmt;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::errors::{Result, VaultError};

/// Length of the master key and derived sub-keys (256 bits).
pub const KEY_LEN: usize = 32;

/// Label authenticated by the key check tag.
const KEY_CHECK_LABEL: &[u8] = b"cryptovault-key-check-v1";

/// Derive a per-record encryption key from the master key.
///
/// `info` is `"cryptovault-record:<name>"`, binding the derived key to
/// one secret name.
pub fn derive_record_key(master_key: &[u8], name: &str) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let info = format!("cryptovault-record:{name}");
    hkdf_derive(master_key, info.as_bytes())
}

/// Run HKDF-SHA256 expand with the given `info`.
///
/// The master key is already uniformly random, so no salt is used.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| VaultError::KeyUnavailable(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// The process-lifetime symmetric key.
///
/// Zeroed on drop, never serialized, and redacted in `Debug` output.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Create a new `MasterKey` from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            VaultError::KeyUnavailable(format!(
                "master key must be exactly {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Access the raw key bytes.
    ///
    /// Only crate-internal code sees the bytes; the public surface hands
    /// out derived keys and tags.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Derive the encryption key for one secret name.
    pub fn derive_record_key(&self, name: &str) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        derive_record_key(&self.bytes, name)
    }

    /// HMAC-SHA256 over a fixed label, keyed with this master key.
    pub fn key_check(&self) -> Result<Vec<u8>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.bytes)
            .map_err(|e| VaultError::KeyUnavailable(format!("HMAC init failed: {e}")))?;
        mac.update(KEY_CHECK_LABEL);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Verify a stored key check tag in constant time.
    pub fn verify_key_check(&self, expected: &[u8]) -> Result<()> {
        use subtle::ConstantTimeEq;

        let actual = self.key_check()?;
        if bool::from(actual.as_slice().ct_eq(expected)) {
            Ok(())
        } else {
            Err(VaultError::KeyUnavailable(
                "key source returned a key that does not belong to this vault".into(),
            ))
        }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keys_differ_per_name() {
        let master = MasterKey::new([0x11; KEY_LEN]);
        let a = master.derive_record_key("a").unwrap();
        let b = master.derive_record_key("b").unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn record_key_is_deterministic() {
        let master = MasterKey::new([0x11; KEY_LEN]);
        let first = master.derive_record_key("token").unwrap();
        let second = master.derive_record_key("token").unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn key_check_verifies_for_same_key_only() {
        let master = MasterKey::new([0x01; KEY_LEN]);
        let other = MasterKey::new([0x02; KEY_LEN]);
        let check = master.key_check().unwrap();

        assert!(master.verify_key_check(&check).is_ok());
        assert!(matches!(
            other.verify_key_check(&check),
            Err(VaultError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(MasterKey::from_slice(&[0u8; 16]).is_err());
        assert!(MasterKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn debug_output_is_redacted() {
        let master = MasterKey::new([0xAB; KEY_LEN]);
        let rendered = format!("{master:?}");
        assert_eq!(rendered, "MasterKey([REDACTED])");
    }

    #[test]
    fn generated_keys_are_distinct() {
        let a = MasterKey::generate();
        let b = MasterKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
