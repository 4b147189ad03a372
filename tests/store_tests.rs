//! Integration tests for the CryptoVault record store.

use std::fs;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use cryptovault::errors::VaultError;
use cryptovault::vault::format::{decode_record, encode_record, MAGIC};
use cryptovault::vault::{FileStore, SecretRecord};
use tempfile::TempDir;

/// Helper: a record with recognizable ciphertext bytes.
fn record(key: &str, version: u64, fill: u8) -> SecretRecord {
    let now = Utc::now();
    SecretRecord {
        key: key.to_string(),
        ciphertext: vec![fill; 64],
        nonce: vec![fill; 12],
        tag: vec![fill; 16],
        version,
        created_at: now,
        updated_at: now,
    }
}

fn store() -> (TempDir, FileStore) {
    let dir = TempDir::new().expect("create temp dir");
    let store = FileStore::open(dir.path()).expect("open store");
    (dir, store)
}

// ---------------------------------------------------------------------------
// Basic operations
// ---------------------------------------------------------------------------

#[test]
fn write_then_read() {
    let (_dir, store) = store();
    store.write("api_token", &record("api_token", 1, 0xAA)).unwrap();

    let loaded = store.read("api_token").unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.ciphertext, vec![0xAA; 64]);
}

#[test]
fn read_missing_is_not_found() {
    let (_dir, store) = store();
    assert!(matches!(store.read("nope"), Err(VaultError::NotFound(_))));
}

#[test]
fn delete_missing_is_not_found() {
    let (_dir, store) = store();
    store.write("k", &record("k", 1, 1)).unwrap();
    store.delete("k").unwrap();
    assert!(matches!(store.delete("k"), Err(VaultError::NotFound(_))));
}

#[test]
fn list_keys_is_sorted_and_decodes_names() {
    let (_dir, store) = store();
    for key in ["zeta", "alpha", "path/with/slashes", "ключ"] {
        store.write(key, &record(key, 1, 0)).unwrap();
    }

    let keys: Vec<String> = store.list_keys().unwrap().into_iter().collect();
    assert_eq!(keys, vec!["alpha", "path/with/slashes", "zeta", "ключ"]);
}

#[test]
fn list_entries_exposes_metadata_only() {
    let (_dir, store) = store();
    store.write("a", &record("a", 3, 0)).unwrap();

    let entries = store.list_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "a");
    assert_eq!(entries[0].version, 3);
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[test]
fn record_files_start_with_magic() {
    let (dir, store) = store();
    store.write("k", &record("k", 1, 0)).unwrap();

    let file = fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .find(|e| e.file_name().to_string_lossy().ends_with(".rec"))
        .expect("record file");
    let bytes = fs::read(file.path()).unwrap();
    assert!(bytes.starts_with(MAGIC));
}

#[test]
fn garbage_record_file_fails_authentication() {
    assert!(matches!(
        decode_record(b"not a record"),
        Err(VaultError::AuthenticationFailed)
    ));

    let mut bytes = encode_record(&record("k", 1, 0)).unwrap();
    bytes.truncate(bytes.len() / 2);
    assert!(matches!(
        decode_record(&bytes),
        Err(VaultError::AuthenticationFailed)
    ));
}

#[test]
fn record_copied_to_another_name_is_rejected() {
    let (dir, store) = store();
    store.write("a", &record("a", 1, 0)).unwrap();
    store.write("b", &record("b", 1, 1)).unwrap();

    // Overwrite b's file with a's contents.
    let files: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
    let a_file = files
        .iter()
        .find(|e| e.file_name() == "YQ.rec")
        .expect("record for a");
    let b_file = files
        .iter()
        .find(|e| e.file_name() == "Yg.rec")
        .expect("record for b");
    fs::copy(a_file.path(), b_file.path()).unwrap();

    assert!(matches!(
        store.read("b"),
        Err(VaultError::AuthenticationFailed)
    ));
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn stale_temp_files_are_removed_on_open() {
    let dir = TempDir::new().unwrap();
    {
        let store = FileStore::open(dir.path()).unwrap();
        store.write("k", &record("k", 1, 0x11)).unwrap();
    }

    // Simulate a crash between temp-file write and rename.
    let stale = dir.path().join(".aw.rec.99999999-0.tmp");
    fs::write(&stale, b"half-written").unwrap();

    let store = FileStore::open(dir.path()).unwrap();
    assert!(!stale.exists());
    assert_eq!(store.read("k").unwrap().ciphertext, vec![0x11; 64]);
    assert_eq!(store.list_keys().unwrap().len(), 1);
}

#[test]
fn opening_another_store_does_not_break_in_flight_writes() {
    let (dir, store) = store();
    let store = Arc::new(store);
    let root = dir.path().to_path_buf();
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let opener = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(std::sync::atomic::Ordering::SeqCst) {
                FileStore::open(&root).expect("second store opens");
            }
        })
    };

    let mut failures = 0;
    for i in 0..500u64 {
        if store.write("k", &record("k", i, (i % 251) as u8)).is_err() {
            failures += 1;
        }
    }
    done.store(true, std::sync::atomic::Ordering::SeqCst);
    opener.join().unwrap();

    assert_eq!(failures, 0);
    assert_eq!(store.read("k").unwrap().version, 499);
}

#[test]
fn list_ignores_temp_files() {
    let (dir, store) = store();
    store.write("k", &record("k", 1, 0)).unwrap();
    fs::write(dir.path().join(".aw.1-1.tmp"), b"x").unwrap();

    let keys = store.list_keys().unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys.contains("k"));
}

#[test]
fn readers_never_see_partial_writes() {
    let (_dir, store) = store();
    let store = Arc::new(store);
    store.write("k", &record("k", 0, 0)).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..=200u64 {
                store.write("k", &record("k", i, (i % 251) as u8)).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let rec = store.read("k").expect("read during write");
                    // Every byte of a record comes from the same write.
                    let fill = rec.ciphertext[0];
                    assert!(rec.ciphertext.iter().all(|b| *b == fill));
                    assert!(rec.nonce.iter().all(|b| *b == fill));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(store.read("k").unwrap().version, 200);
}

#[test]
fn concurrent_updates_on_one_name_are_serialized() {
    let (_dir, store) = store();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..10 {
                    store
                        .update("counter", |prev| {
                            let version = prev.map_or(1, |p| p.version + 1);
                            Ok(record("counter", version, 0))
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.read("counter").unwrap().version, 80);
}
