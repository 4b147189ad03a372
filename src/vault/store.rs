//! The persistent store: one encrypted record file per secret.
//!
//! `FileStore` maps secret names to `SecretRecord`s under a single
//! directory.  File names are the base64url encoding of the secret
//! name, so any string is a valid name.
//!
//! Writes and deletes on the same name are serialized by a per-name
//! mutex.  Reads take no lock: every write replaces the file with an
//! atomic rename, so a reader sees either the old record or the new
//! one.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::{debug, warn};

use crate::errors::{Result, VaultError};

use super::format::{self, decode_record, encode_record, is_temp_file};
use super::record::{EntryMetadata, SecretRecord};

/// Extension of record files.
const RECORD_EXT: &str = "rec";

/// Longest accepted secret name, in bytes.
///
/// base64 of 180 bytes is 240 characters, which keeps the record file
/// name under the common 255-byte limit.
pub const MAX_KEY_LEN: usize = 180;

/// Delay before the single retry of a transient write failure.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Age after which a temp file is abandoned whoever its writer was.
const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

/// Validate that a secret name can be stored.
///
/// Must be non-empty and at most `MAX_KEY_LEN` bytes.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VaultError::InvalidArgument("secret name cannot be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(VaultError::InvalidArgument(format!(
            "secret name cannot exceed {MAX_KEY_LEN} bytes (got {})",
            key.len()
        )));
    }
    Ok(())
}

/// Directory-backed record store.
pub struct FileStore {
    /// Directory holding the `.rec` files.
    root: PathBuf,

    /// Per-name write locks.  Entries are never removed, so two writers
    /// on the same name always share one mutex.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    retry_delay: Duration,
}

impl FileStore {
    /// Open (or create) a store in `root`.
    ///
    /// Temp files left behind by an interrupted write are removed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| VaultError::storage(format!("creating {}", root.display()), e))?;

        let store = Self {
            root,
            locks: Mutex::new(HashMap::new()),
            retry_delay: DEFAULT_RETRY_DELAY,
        };
        store.remove_stale_temp_files()?;
        Ok(store)
    }

    /// Set the delay before retrying a transient write failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Directory holding the record files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ------------------------------------------------------------------
    // Record operations
    // ------------------------------------------------------------------

    /// Read the record stored under `key`.
    pub fn read(&self, key: &str) -> Result<SecretRecord> {
        validate_key(key)?;
        let path = self.record_path(key);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(key.to_string()));
            }
            Err(e) => return Err(VaultError::storage(format!("reading {}", path.display()), e)),
        };

        let record = decode_record(&data)?;

        // A record file copied over another name must not be accepted.
        if record.key != key {
            return Err(VaultError::AuthenticationFailed);
        }
        Ok(record)
    }

    /// Replace the record stored under `key`.
    pub fn write(&self, key: &str, record: &SecretRecord) -> Result<()> {
        validate_key(key)?;
        if record.key != key {
            return Err(VaultError::InvalidArgument(format!(
                "record for '{}' cannot be stored under '{key}'",
                record.key
            )));
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.persist(key, record)
    }

    /// Read-modify-write under the name's lock.
    ///
    /// `build` receives the current record (if any) and returns the one
    /// to store.  An existing record that no longer decodes is handed
    /// over as `None`, so a fresh write can replace it.
    pub fn update<F>(&self, key: &str, build: F) -> Result<SecretRecord>
    where
        F: FnOnce(Option<&SecretRecord>) -> Result<SecretRecord>,
    {
        validate_key(key)?;
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = match self.read(key) {
            Ok(record) => Some(record),
            Err(VaultError::NotFound(_)) => None,
            Err(VaultError::AuthenticationFailed) => {
                warn!(key = %key, "Replacing a record that failed its integrity check");
                None
            }
            Err(e) => return Err(e),
        };

        let record = build(previous.as_ref())?;
        if record.key != key {
            return Err(VaultError::InvalidArgument(format!(
                "record for '{}' cannot be stored under '{key}'",
                record.key
            )));
        }
        self.persist(key, &record)?;
        Ok(record)
    }

    /// Remove the record stored under `key`.
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(key.to_string()));
            }
            Err(e) => return Err(VaultError::storage(format!("removing {}", path.display()), e)),
        }
        format::sync_dir(&self.root)?;

        debug!(key = %key, "Record removed");
        Ok(())
    }

    /// Returns `true` if a record exists for `key`.
    ///
    /// Metadata-only check, nothing is decoded.
    pub fn contains(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.record_path(key).is_file()
    }

    /// Names of all stored records.
    pub fn list_keys(&self) -> Result<BTreeSet<String>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| VaultError::storage(format!("listing {}", self.root.display()), e))?;

        let mut keys = BTreeSet::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| VaultError::storage(format!("listing {}", self.root.display()), e))?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();

            if is_temp_file(&name) {
                continue;
            }
            let Some(stem) = name.strip_suffix(&format!(".{RECORD_EXT}")) else {
                continue;
            };

            match decode_key(stem) {
                Some(key) => {
                    keys.insert(key);
                }
                None => warn!(file = %name, "Ignoring record file with an undecodable name"),
            }
        }
        Ok(keys)
    }

    /// Metadata for all stored records, sorted by name.
    pub fn list_entries(&self) -> Result<Vec<EntryMetadata>> {
        let mut entries = Vec::new();
        for key in self.list_keys()? {
            match self.read(&key) {
                Ok(record) => entries.push(record.metadata()),
                // Deleted between the directory scan and the read.
                Err(VaultError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn record_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{RECORD_EXT}", URL_SAFE_NO_PAD.encode(key.as_bytes())))
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Encode and atomically write a record; retried once on a
    /// transient I/O failure.
    fn persist(&self, key: &str, record: &SecretRecord) -> Result<()> {
        self.persist_with(key, record, format::write_atomic)
    }

    fn persist_with<W>(&self, key: &str, record: &SecretRecord, mut write: W) -> Result<()>
    where
        W: FnMut(&Path, &[u8]) -> Result<()>,
    {
        let bytes = encode_record(record)?;
        let path = self.record_path(key);

        match write(&path, &bytes) {
            Err(e) if e.is_transient() => {
                warn!(key = %key, error = %e, "Transient write failure, retrying once");
                thread::sleep(self.retry_delay);
                write(&path, &bytes)?;
            }
            other => other?,
        }

        debug!(key = %key, version = record.version, "Record written");
        Ok(())
    }

    /// Remove temp files whose writer is gone.
    ///
    /// A temp file belongs to a live writer while the pid in its name is
    /// running; another vault instance may be about to rename it.  Files
    /// from dead pids, and any temp file older than `STALE_TEMP_AGE`,
    /// are abandoned.
    fn remove_stale_temp_files(&self) -> Result<()> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| VaultError::storage(format!("listing {}", self.root.display()), e))?;

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if !is_temp_file(&name) {
                continue;
            }

            let owner_gone = format::temp_file_owner(&name).is_some_and(|pid| !format::process_alive(pid));
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age > STALE_TEMP_AGE);

            if owner_gone || expired {
                warn!(file = %name, "Removing temp file left by an interrupted write");
                let _ = fs::remove_file(entry.path());
            } else {
                debug!(file = %name, "Leaving temp file of a live writer");
            }
        }
        Ok(())
    }
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(key: &str, version: u64) -> SecretRecord {
        let now = Utc::now();
        SecretRecord {
            key: key.to_string(),
            ciphertext: vec![version as u8; 8],
            nonce: vec![0; 12],
            tag: vec![0; 16],
            version,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn validate_key_rules() {
        assert!(validate_key("a").is_ok());
        assert!(validate_key("日本語のキー").is_ok());
        assert!(matches!(validate_key(""), Err(VaultError::InvalidArgument(_))));
        assert!(validate_key(&"x".repeat(MAX_KEY_LEN)).is_ok());
        assert!(validate_key(&"x".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn names_with_path_separators_stay_inside_root() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.write("../escape", &record("../escape", 1)).unwrap();
        assert_eq!(store.read("../escape").unwrap().version, 1);
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn write_rejects_mismatched_record_name() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let result = store.write("a", &record("b", 1));
        assert!(matches!(result, Err(VaultError::InvalidArgument(_))));
    }

    #[test]
    fn update_sees_previous_record() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let first = store
            .update("k", |prev| {
                assert!(prev.is_none());
                Ok(record("k", 1))
            })
            .unwrap();
        let second = store
            .update("k", |prev| Ok(record("k", prev.unwrap().version + 1)))
            .unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(store.read("k").unwrap().version, 2);
    }

    #[test]
    fn update_error_leaves_record_untouched() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.write("k", &record("k", 1)).unwrap();

        let result = store.update("k", |_| Err(VaultError::EncryptionFailed("boom".into())));
        assert!(result.is_err());
        assert_eq!(store.read("k").unwrap().version, 1);
    }

    #[test]
    fn transient_write_failure_is_retried_once() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path())
            .unwrap()
            .with_retry_delay(Duration::from_millis(1));

        let mut calls = 0;
        store
            .persist_with("k", &record("k", 1), |path, bytes| {
                calls += 1;
                if calls == 1 {
                    return Err(VaultError::storage(
                        "writing",
                        io::Error::from(io::ErrorKind::Interrupted),
                    ));
                }
                format::write_atomic(path, bytes)
            })
            .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(store.read("k").unwrap().version, 1);
    }

    #[test]
    fn second_transient_failure_is_not_retried_again() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path())
            .unwrap()
            .with_retry_delay(Duration::from_millis(1));

        let mut calls = 0;
        let result = store.persist_with("k", &record("k", 1), |_, _| {
            calls += 1;
            Err(VaultError::storage(
                "writing",
                io::Error::from(io::ErrorKind::TimedOut),
            ))
        });

        assert!(matches!(result, Err(VaultError::StorageFailure { .. })));
        assert_eq!(calls, 2);
        assert!(matches!(store.read("k"), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn permanent_write_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut calls = 0;
        let result = store.persist_with("k", &record("k", 1), |_, _| {
            calls += 1;
            Err(VaultError::storage(
                "writing",
                io::Error::from(io::ErrorKind::PermissionDenied),
            ))
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn open_keeps_temp_files_of_live_writers() {
        let dir = TempDir::new().unwrap();
        let ours = dir
            .path()
            .join(format!(".YQ.rec.{}-0.tmp", std::process::id()));
        fs::write(&ours, b"in flight").unwrap();

        FileStore::open(dir.path()).unwrap();
        assert!(ours.exists());
    }

    #[test]
    fn contains_reflects_writes_and_deletes() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(!store.contains("k"));
        store.write("k", &record("k", 1)).unwrap();
        assert!(store.contains("k"));
        store.delete("k").unwrap();
        assert!(!store.contains("k"));
    }
}
