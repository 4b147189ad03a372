//! Key file source: the master key lives in a 32-byte file.
//!
//! The file is created on first use with owner-only permissions.
//! Creation uses `create_new`, so two processes racing to create the
//! same key file end up sharing whichever one won.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::info;
use zeroize::Zeroizing;

use super::key_manager::KeySource;
use super::keys::{MasterKey, KEY_LEN};
use crate::errors::{Result, VaultError};
use crate::vault::format::temp_path_for;

/// A `KeySource` backed by a key file on disk.
#[derive(Debug, Clone)]
pub struct KeyfileSource {
    path: PathBuf,
}

impl KeyfileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeySource for KeyfileSource {
    fn name(&self) -> &str {
        "keyfile"
    }

    fn get_or_create(&self, _vault_id: &str) -> Result<MasterKey> {
        match load_keyfile(&self.path) {
            Err(VaultError::NotFound(_)) => {}
            other => return other,
        }

        let key = MasterKey::generate();
        match create_keyfile(&self.path, key.as_bytes()) {
            Ok(()) => {
                info!(path = %self.path.display(), "Generated new master key file");
                Ok(key)
            }
            // Someone else created it between our read and our create.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => load_keyfile(&self.path),
            Err(e) => Err(VaultError::KeyUnavailable(format!(
                "failed to write key file {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// Load a key file and validate its length.
///
/// A missing file is reported as `NotFound` so the caller can decide to
/// create one; every other problem is `KeyUnavailable`.
pub fn load_keyfile(path: &Path) -> Result<MasterKey> {
    let data = match fs::read(path) {
        Ok(data) => Zeroizing::new(data),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(VaultError::NotFound(path.display().to_string()));
        }
        Err(e) => {
            return Err(VaultError::KeyUnavailable(format!(
                "failed to read key file {}: {e}",
                path.display()
            )));
        }
    };

    if data.len() != KEY_LEN {
        return Err(VaultError::KeyUnavailable(format!(
            "key file must be exactly {KEY_LEN} bytes, got {}",
            data.len()
        )));
    }

    MasterKey::from_slice(&data)
}

/// Create a new key file, failing with `AlreadyExists` if one exists.
///
/// The key is written and synced under a temp name first, then
/// hard-linked into place.  The link either publishes a complete file
/// or fails because another creator won, so nobody ever reads a
/// partially written key.
fn create_keyfile(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)?;
            parent
        }
        _ => Path::new("."),
    };

    let tmp_path = temp_path_for(path);
    let result = write_private(&tmp_path, bytes).and_then(|()| fs::hard_link(&tmp_path, path));
    let _ = fs::remove_file(&tmp_path);
    result?;

    #[cfg(unix)]
    fs::File::open(parent)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = parent;

    Ok(())
}

fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    // On Unix, restrict permissions to owner-only read/write.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
