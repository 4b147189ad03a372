//! On-disk record format and atomic file replacement.
//!
//! A `.rec` file has this layout:
//!
//! ```text
//! [CVRC: 4 bytes][version: 1 byte][record JSON]
//! ```
//!
//! - **Magic** (`CVRC`): identifies the file as a CryptoVault record.
//! - **Version**: format version (currently `1`).
//! - **Record JSON**: serialized `SecretRecord`.
//!
//! Every file the vault writes goes through `write_atomic`, so readers
//! see either the old file or the new one and never a prefix.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::warn;

use super::record::SecretRecord;
use crate::errors::{Result, VaultError};

/// Magic bytes at the start of every record file.
pub const MAGIC: &[u8; 4] = b"CVRC";

/// Current record format version.
pub const CURRENT_VERSION: u8 = 1;

/// Fixed-size prefix: 4 (magic) + 1 (version).
const PREFIX_LEN: usize = 5;

/// Suffix of in-flight temp files.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Distinguishes temp files written concurrently by this process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Serialize a record into the binary file layout.
pub fn encode_record(record: &SecretRecord) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(record)
        .map_err(|e| VaultError::SerializationError(format!("record: {e}")))?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + body.len());
    buf.extend_from_slice(MAGIC);
    buf.push(CURRENT_VERSION);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Parse a record file.
///
/// Anything that does not decode is an integrity failure, reported as
/// `AuthenticationFailed` like a bad tag would be.
pub fn decode_record(data: &[u8]) -> Result<SecretRecord> {
    if data.len() < PREFIX_LEN || &data[0..4] != MAGIC || data[4] != CURRENT_VERSION {
        return Err(VaultError::AuthenticationFailed);
    }

    serde_json::from_slice(&data[PREFIX_LEN..]).map_err(|_| VaultError::AuthenticationFailed)
}

/// Whether a directory entry is an in-flight or abandoned temp file.
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// Pid of the process that created a temp file, parsed from its name
/// (`.{target}.{pid}-{counter}.tmp`).
pub fn temp_file_owner(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(TEMP_SUFFIX)?;
    let (_, tail) = stem.rsplit_once('.')?;
    let (pid, counter) = tail.split_once('-')?;
    counter.parse::<u64>().ok()?;
    pid.parse().ok()
}

/// Whether `pid` names a running process.
///
/// Off Unix there is no cheap check, so every pid counts as alive.
pub fn process_alive(pid: u32) -> bool {
    pid == std::process::id() || pid_exists(pid)
}

#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks that the process exists.
    // SAFETY: kill with signal 0 sends nothing.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_exists(_pid: u32) -> bool {
    true
}

/// Write `bytes` to `path` **atomically**.
///
/// 1. Write to a uniquely named temp file in the same directory.
/// 2. `fsync` the temp file.
/// 3. Rename it over the target path.
/// 4. `fsync` the directory so the rename itself is durable (Unix).
///
/// If the process dies before step 3, the target is untouched and the
/// temp file is cleaned up by the next store open once its writer is
/// gone.  A failure in step 4 is not an error: the new contents are
/// already visible, only their durability across a power loss is in
/// doubt, and that is logged at `warn`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic_with(path, bytes, sync_dir)
}

fn write_atomic_with<F>(path: &Path, bytes: &[u8], sync: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = temp_path_for(path);

    let result = (|| {
        let mut file = File::create(&tmp_path)
            .map_err(|e| VaultError::storage(format!("creating {}", tmp_path.display()), e))?;
        file.write_all(bytes)
            .map_err(|e| VaultError::storage(format!("writing {}", tmp_path.display()), e))?;
        file.sync_all()
            .map_err(|e| VaultError::storage(format!("syncing {}", tmp_path.display()), e))?;
        drop(file);

        fs::rename(&tmp_path, path)
            .map_err(|e| VaultError::storage(format!("replacing {}", path.display()), e))
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    if let Err(e) = sync(parent) {
        warn!(path = %path.display(), error = %e, "Write landed but directory sync failed");
    }
    Ok(())
}

/// `fsync` a directory so renames and removals inside it are durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| VaultError::storage(format!("syncing {}", dir.display()), e))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Unique temp file name next to `path`, owned by this process.
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent.join(format!(
        ".{}.{}-{n}{TEMP_SUFFIX}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ))
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let encoded = BASE64.encode(data);
    serializer.serialize_str(&encoded)
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample() -> SecretRecord {
        let now = Utc::now();
        SecretRecord {
            key: "db_password".into(),
            ciphertext: vec![9; 20],
            nonce: vec![1; 12],
            tag: vec![2; 16],
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn encoded_record_starts_with_magic() {
        let record = sample();
        let bytes = encode_record(&record).unwrap();
        assert_eq!(&bytes[..4], b"CVRC");
        assert_eq!(bytes[4], CURRENT_VERSION);
        assert_eq!(decode_record(&bytes).unwrap(), record);
    }

    #[test]
    fn bad_magic_is_an_integrity_failure() {
        let mut bytes = encode_record(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode_record(&bytes), Err(VaultError::AuthenticationFailed)));
    }

    #[test]
    fn truncated_json_is_an_integrity_failure() {
        let bytes = encode_record(&sample()).unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(decode_record(cut), Err(VaultError::AuthenticationFailed)));
    }

    #[test]
    fn write_atomic_replaces_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.rec");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_temp_file(&e.file_name().to_string_lossy()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_atomic_into_missing_directory_is_storage_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("a.rec");
        assert!(matches!(
            write_atomic(&path, b"x"),
            Err(VaultError::StorageFailure { .. })
        ));
    }

    #[test]
    fn temp_files_are_recognized() {
        assert!(is_temp_file(".YQ.rec.123-0.tmp"));
        assert!(!is_temp_file("YQ.rec"));
    }

    #[test]
    fn temp_file_owner_is_parsed_from_name() {
        assert_eq!(temp_file_owner(".YQ.rec.123-0.tmp"), Some(123));
        assert_eq!(temp_file_owner(".a-b_c.rec.77-12.tmp"), Some(77));
        assert_eq!(temp_file_owner(".junk.tmp"), None);
        assert_eq!(temp_file_owner(".YQ.rec.abc-0.tmp"), None);
    }

    #[test]
    fn temp_path_carries_this_process_id() {
        let tmp = temp_path_for(Path::new("/vault/records/YQ.rec"));
        let name = tmp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(is_temp_file(&name));
        assert_eq!(temp_file_owner(&name), Some(std::process::id()));
    }

    #[test]
    fn this_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn pid_beyond_pid_max_is_not_alive() {
        // Linux caps pids at 2^22.
        assert!(!process_alive(99_999_999));
    }

    #[test]
    fn failed_directory_sync_after_rename_still_succeeds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.rec");

        let result = write_atomic_with(&path, b"landed", |dir| {
            Err(VaultError::storage(
                format!("syncing {}", dir.display()),
                std::io::Error::other("disk gone"),
            ))
        });

        assert!(result.is_ok());
        assert_eq!(fs::read(&path).unwrap(), b"landed");
    }
}
