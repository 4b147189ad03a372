//! Vault module: encrypted secret storage.
//!
//! This module provides:
//! - `SecretRecord` and `EntryMetadata` types (`record`)
//! - The record file format and atomic writes (`format`)
//! - Vault metadata binding the directory to its key (`meta`)
//! - The per-record `FileStore` (`store`)
//! - Stream and future delivery adapters (`delivery`)
//! - The `Vault` facade tying key manager, cipher and store together

pub mod delivery;
pub mod format;
pub mod meta;
pub mod record;
pub mod store;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::config::Settings;
use crate::crypto::{decrypt, encrypt, KeyManager};
use crate::errors::{Result, VaultError};

// Re-export the most commonly used items.
pub use delivery::{SecretFuture, SecretStream};
pub use record::{EntryMetadata, SecretRecord};
pub use store::{validate_key, FileStore};

/// Sub-directory of the vault directory holding record files.
const RECORDS_DIR: &str = "records";

/// Tuning knobs for `Vault::open_with`.
#[derive(Debug, Clone)]
pub struct VaultOptions {
    /// Worker threads for the vault's own runtime, used only when the
    /// vault is opened outside a Tokio runtime.
    pub io_threads: usize,

    /// Delay before the single retry of a transient write failure.
    pub write_retry_delay: Duration,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            io_threads: 2,
            write_retry_delay: Duration::from_millis(50),
        }
    }
}

/// Where blocking vault work runs.
pub(crate) enum Executor {
    /// The runtime the vault was opened in.
    Shared(Handle),
    /// A runtime the vault built for itself.
    Owned {
        handle: Handle,
        runtime: Option<Runtime>,
    },
}

impl Executor {
    fn current_or_owned(io_threads: usize) -> Result<Self> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self::Shared(handle));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(io_threads.max(1))
            .thread_name("cryptovault-io")
            .build()
            .map_err(|e| VaultError::TaskFailed(format!("failed to start I/O runtime: {e}")))?;
        Ok(Self::Owned {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        match self {
            Self::Shared(handle) | Self::Owned { handle, .. } => handle,
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Dropping a runtime inside an async context panics; shutting it
        // down in the background does not.
        if let Self::Owned { runtime, .. } = self {
            if let Some(runtime) = runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

/// Shared state behind every `Vault` clone.
pub(crate) struct Inner {
    keys: KeyManager,
    store: FileStore,
}

impl Inner {
    /// Encrypt `value` and store it under `key`.  Returns the new
    /// revision.
    fn seal_and_store(&self, key: &str, value: &str) -> Result<u64> {
        validate_key(key)?;
        let master = self.keys.get_key()?;
        let record_key = master.derive_record_key(key)?;
        let now = Utc::now();

        let record = self.store.update(key, |previous| {
            // The stored revision is unauthenticated until decrypted; one
            // that cannot be bumped is treated like a corrupt record.
            let (version, created_at) = match previous {
                Some(p) => match p.version.checked_add(1) {
                    Some(version) => (version, p.created_at),
                    None => {
                        warn!(key = %key, "Replacing a record with an exhausted revision");
                        (1, now)
                    }
                },
                None => (1, now),
            };
            let aad = SecretRecord::associated_data(key, version);
            let sealed = encrypt(&record_key[..], &aad, value.as_bytes())?;

            Ok(SecretRecord {
                key: key.to_string(),
                ciphertext: sealed.ciphertext,
                nonce: sealed.nonce.to_vec(),
                tag: sealed.tag.to_vec(),
                version,
                created_at,
                updated_at: now,
            })
        })?;

        debug!(key = %key, version = record.version, "Secret stored");
        Ok(record.version)
    }

    /// The one read path: load the record, decrypt it, return UTF-8.
    fn load_and_open(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let record = self.store.read(key)?;
        let master = self.keys.get_key()?;
        let record_key = master.derive_record_key(key)?;

        let aad = SecretRecord::associated_data(key, record.version);
        let plaintext = decrypt(
            &record_key[..],
            &aad,
            &record.ciphertext,
            &record.nonce,
            &record.tag,
        )?;

        debug!(key = %key, version = record.version, "Secret decrypted");

        // On error, zeroize the bytes inside the error before discarding.
        String::from_utf8(plaintext).map_err(|e| {
            let mut bad_bytes = e.into_bytes();
            bad_bytes.zeroize();
            VaultError::AuthenticationFailed
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.store.delete(key)?;
        debug!(key = %key, "Secret deleted");
        Ok(())
    }
}

/// The public vault handle.
///
/// Cheap to clone; clones share the key manager, the store and the
/// executor.  Every operation comes in a form that runs off the
/// caller's thread; the `_blocking` forms run on the caller's thread.
#[derive(Clone)]
pub struct Vault {
    path: PathBuf,
    inner: Arc<Inner>,
    executor: Arc<Executor>,
}

impl Vault {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Open (or create) the vault in directory `dir` with default options.
    pub fn open(dir: impl AsRef<Path>, keys: KeyManager) -> Result<Self> {
        Self::open_with(dir, keys, &VaultOptions::default())
    }

    /// Open (or create) the vault in directory `dir`.
    ///
    /// The key is not fetched here; the first operation that needs it
    /// does that, and binds it to `<dir>/vault.json`.
    pub fn open_with(dir: impl AsRef<Path>, keys: KeyManager, options: &VaultOptions) -> Result<Self> {
        let path = dir.as_ref().to_path_buf();
        let store = FileStore::open(path.join(RECORDS_DIR))?
            .with_retry_delay(options.write_retry_delay);
        let keys = keys.with_metadata(path.join(meta::META_FILE));
        let executor = Executor::current_or_owned(options.io_threads)?;

        info!(path = %path.display(), vault_id = keys.vault_id(), "Vault opened");

        Ok(Self {
            path,
            inner: Arc::new(Inner { keys, store }),
            executor: Arc::new(executor),
        })
    }

    /// Open the vault described by `settings`, relative to `project_dir`.
    pub fn from_settings(settings: &Settings, project_dir: &Path) -> Result<Self> {
        let keys = KeyManager::new(settings.vault_id.clone(), settings.key_source(project_dir)?);
        Self::open_with(settings.vault_path(project_dir), keys, &settings.vault_options())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Encrypt and store `value` under `key`, off the caller's thread.
    pub async fn put_string(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = Zeroizing::new(value.to_string());
        self.run_blocking(move |inner| inner.seal_and_store(&key, &value).map(|_| ()))
            .await
    }

    /// Encrypt and store `value` under `key` on the calling thread.
    pub fn put_string_blocking(&self, key: &str, value: &str) -> Result<()> {
        self.inner.seal_and_store(key, value).map(|_| ())
    }

    /// Remove the secret stored under `key`, off the caller's thread.
    ///
    /// Fails with `NotFound` if there is none, including on a second
    /// delete of the same name.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run_blocking(move |inner| inner.remove(&key)).await
    }

    /// Remove the secret stored under `key` on the calling thread.
    pub fn delete_blocking(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read and decrypt on the calling thread.  May block on disk I/O.
    pub fn get_string_blocking(&self, key: &str) -> Result<String> {
        self.inner.load_and_open(key)
    }

    /// Lazy single-item stream; the read starts on first poll.
    pub fn get_string_stream(&self, key: &str) -> SecretStream {
        SecretStream::new(
            key.to_string(),
            Arc::clone(&self.inner),
            Arc::clone(&self.executor),
        )
    }

    /// Start the read now, off the caller's thread, and return a handle
    /// to its result.
    pub fn get_string_future(&self, key: &str) -> SecretFuture {
        SecretFuture::spawn(
            key.to_string(),
            Arc::clone(&self.inner),
            Arc::clone(&self.executor),
        )
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    /// Names of all stored secrets, sorted.
    pub fn list_keys(&self) -> Result<BTreeSet<String>> {
        self.inner.store.list_keys()
    }

    /// Metadata for all stored secrets, sorted by name.  No decryption.
    pub fn entries(&self) -> Result<Vec<EntryMetadata>> {
        self.inner.store.list_entries()
    }

    /// Returns `true` if a secret is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.store.contains(key)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Returns the vault directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the identifier handed to the key source.
    pub fn vault_id(&self) -> &str {
        self.inner.keys.vault_id()
    }

    /// Returns the underlying record store.
    pub fn store(&self) -> &FileStore {
        &self.inner.store
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.executor
            .handle()
            .spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| VaultError::TaskFailed(e.to_string()))?
    }
}
