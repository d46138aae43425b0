//! Tests for Database
//!
//! These tests verify:
//! - Open/create of the file pair and bucket count handling
//! - fetch/store/delete semantics for every store mode
//! - Size limits and empty keys
//! - Iteration completeness and exclusion of deleted records
//! - Persistence across reopen, sync, close, drop
//! - Concurrent handles on the same files

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use hashkv::engine::{data_path, index_path};
use hashkv::index::RECORD_HEADER_SIZE;
use hashkv::{Config, Database, HashKvError, StoreMode, DATA_MAX, KEY_MAX};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn db_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("testdb")
}

fn create_db(path: &Path, bucket_count: u32) -> Database {
    let config = Config::builder()
        .path(path)
        .create(true)
        .bucket_count(bucket_count)
        .build();
    Database::open(config).unwrap()
}

fn setup_temp_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = create_db(&db_path(&temp_dir), 64);
    (temp_dir, db)
}

fn file_sizes(path: &Path) -> (u64, u64) {
    (
        fs::metadata(index_path(path)).unwrap().len(),
        fs::metadata(data_path(path)).unwrap().len(),
    )
}

fn collect(db: &mut Database) -> HashMap<Vec<u8>, Vec<u8>> {
    let mut seen = HashMap::new();
    for record in db.iter() {
        let (key, value) = record.unwrap();
        let previous = seen.insert(key.to_vec(), value.to_vec());
        assert!(previous.is_none(), "key {:?} returned twice", key);
    }
    seen
}

// =============================================================================
// Open / Create Tests
// =============================================================================

#[test]
fn test_create_writes_empty_index() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    let db = create_db(&path, 16);

    assert_eq!(db.bucket_count(), 16);
    assert!(index_path(&path).exists());
    assert!(data_path(&path).exists());

    // Header slot + free list slot + 16 chain heads
    let (index_len, data_len) = file_sizes(&path);
    assert_eq!(index_len, 8 + 8 + 16 * 8);
    assert_eq!(data_len, 0);
}

#[test]
fn test_create_rejects_invalid_bucket_count() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    for count in [0u32, 3, 4096] {
        let config = Config::builder()
            .path(&path)
            .create(true)
            .bucket_count(count)
            .build();
        let result = Database::open(config);
        assert!(matches!(result, Err(HashKvError::InvalidBucketCount(c)) if c == count));
    }

    // Rejected before any file was created
    assert!(!index_path(&path).exists());
}

#[test]
fn test_open_missing_without_create() {
    let temp_dir = TempDir::new().unwrap();

    let result = Database::open_path(db_path(&temp_dir));

    assert!(matches!(result, Err(HashKvError::Io(_))));
}

#[test]
fn test_reopen_keeps_bucket_count() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    create_db(&path, 32).close().unwrap();

    // Creating over an existing index ignores the requested count
    let db = create_db(&path, 1024);
    assert_eq!(db.bucket_count(), 32);
    db.close().unwrap();

    let db = Database::open_path(&path).unwrap();
    assert_eq!(db.bucket_count(), 32);
}

#[test]
fn test_open_truncated_index_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    create_db(&path, 64).close().unwrap();
    let file = fs::OpenOptions::new().write(true).open(index_path(&path)).unwrap();
    file.set_len(20).unwrap();

    let result = Database::open_path(&path);
    assert!(matches!(result, Err(HashKvError::CorruptRecord(_))));
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_store_fetch() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"hello", b"world", StoreMode::Upsert).unwrap();

    assert_eq!(db.fetch(b"hello").unwrap().as_deref(), Some(&b"world"[..]));
}

#[test]
fn test_fetch_nonexistent_key() {
    let (_temp, mut db) = setup_temp_db();

    assert_eq!(db.fetch(b"nonexistent").unwrap(), None);
}

#[test]
fn test_store_many_keys() {
    let (_temp, mut db) = setup_temp_db();

    for i in 0..500 {
        let key = format!("key{}", i);
        let value = format!("value{}", i);
        db.store(key.as_bytes(), value.as_bytes(), StoreMode::Insert)
            .unwrap();
    }

    for i in 0..500 {
        let key = format!("key{}", i);
        let expected = format!("value{}", i);
        assert_eq!(
            db.fetch(key.as_bytes()).unwrap().as_deref(),
            Some(expected.as_bytes())
        );
    }
}

#[test]
fn test_single_bucket_long_chain() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = create_db(&db_path(&temp_dir), 1);

    for i in 0..50 {
        db.store(format!("k{}", i).as_bytes(), &[i as u8], StoreMode::Insert)
            .unwrap();
    }
    // Delete from the middle, the head and the tail of the chain
    db.delete(b"k25").unwrap();
    db.delete(b"k49").unwrap();
    db.delete(b"k0").unwrap();

    for i in 0..50 {
        let result = db.fetch(format!("k{}", i).as_bytes()).unwrap();
        if [0, 25, 49].contains(&i) {
            assert_eq!(result, None);
        } else {
            assert_eq!(result.as_deref(), Some(&[i as u8][..]));
        }
    }
}

#[test]
fn test_empty_value() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"key", b"", StoreMode::Insert).unwrap();

    assert_eq!(db.fetch(b"key").unwrap().as_deref(), Some(&b""[..]));
}

#[test]
fn test_binary_data() {
    let (_temp, mut db) = setup_temp_db();

    // Binary key and value with null bytes
    let key = b"\x00\x01\x02\xFF\xFE";
    let value = b"\xFF\x00\xAB\xCD\x00";

    db.store(key, value, StoreMode::Upsert).unwrap();
    assert_eq!(db.fetch(key).unwrap().as_deref(), Some(&value[..]));
}

#[test]
fn test_max_sizes() {
    let (_temp, mut db) = setup_temp_db();

    let key = vec![b'k'; KEY_MAX];
    let value = vec![0xAB; DATA_MAX];

    db.store(&key, &value, StoreMode::Insert).unwrap();
    assert_eq!(db.fetch(&key).unwrap().as_deref(), Some(&value[..]));
}

// =============================================================================
// Store Mode Tests
// =============================================================================

#[test]
fn test_insert_rejects_duplicates() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"key", b"v1", StoreMode::Insert).unwrap();
    let result = db.store(b"key", b"v2", StoreMode::Insert);

    assert!(matches!(result, Err(HashKvError::AlreadyExists)));
    assert_eq!(db.fetch(b"key").unwrap().as_deref(), Some(&b"v1"[..]));
}

#[test]
fn test_replace_requires_existence() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut db = create_db(&path, 64);
    db.store(b"other", b"value", StoreMode::Insert).unwrap();
    let before = file_sizes(&path);

    let result = db.store(b"missing", b"value", StoreMode::Replace);

    assert!(matches!(result, Err(HashKvError::NotFound)));
    assert_eq!(file_sizes(&path), before);
    assert_eq!(db.fetch(b"missing").unwrap(), None);
}

#[test]
fn test_replace_existing() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"key", b"value1", StoreMode::Insert).unwrap();
    db.store(b"key", b"value2", StoreMode::Replace).unwrap();

    assert_eq!(db.fetch(b"key").unwrap().as_deref(), Some(&b"value2"[..]));
}

#[test]
fn test_upsert_inserts_then_replaces() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"key", b"first", StoreMode::Upsert).unwrap();
    db.store(b"key", b"second!", StoreMode::Upsert).unwrap();

    assert_eq!(db.fetch(b"key").unwrap().as_deref(), Some(&b"second!"[..]));
}

#[test]
fn test_replace_smaller_overwrites_in_place() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut db = create_db(&path, 64);

    db.store(b"key", b"a long value", StoreMode::Insert).unwrap();
    let before = file_sizes(&path);

    db.store(b"key", b"short", StoreMode::Replace).unwrap();
    assert_eq!(file_sizes(&path), before);
    assert_eq!(db.fetch(b"key").unwrap().as_deref(), Some(&b"short"[..]));

    // The slack left by the shrink is still usable by the same record
    db.store(b"key", b"a long value", StoreMode::Replace).unwrap();
    assert_eq!(file_sizes(&path), before);
    assert_eq!(db.fetch(b"key").unwrap().as_deref(), Some(&b"a long value"[..]));

    assert_eq!(db.stats().store_overwritten, 2);
}

#[test]
fn test_replace_larger_relocates() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut db = create_db(&path, 64);

    db.store(b"key", b"1", StoreMode::Insert).unwrap();
    let (index_before, data_before) = file_sizes(&path);

    db.store(b"key", b"333", StoreMode::Upsert).unwrap();

    let (index_after, data_after) = file_sizes(&path);
    assert_eq!(index_after, index_before + RECORD_HEADER_SIZE as u64 + 3);
    assert_eq!(data_after, data_before + 3);
    assert_eq!(db.fetch(b"key").unwrap().as_deref(), Some(&b"333"[..]));
    assert_eq!(db.stats().store_relocated, 1);
}

// =============================================================================
// Limit Tests
// =============================================================================

#[test]
fn test_too_large_rejected_before_io() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut db = create_db(&path, 64);
    let before = file_sizes(&path);

    let result = db.store(&vec![b'k'; KEY_MAX + 1], b"v", StoreMode::Upsert);
    assert!(matches!(
        result,
        Err(HashKvError::TooLarge { what: "key", .. })
    ));

    let result = db.store(b"k", &vec![0; DATA_MAX + 1], StoreMode::Upsert);
    assert!(matches!(
        result,
        Err(HashKvError::TooLarge { what: "data", len, max }) if len == DATA_MAX + 1 && max == DATA_MAX
    ));

    assert_eq!(file_sizes(&path), before);
    assert_eq!(db.stats().store_errors, 2);
}

#[test]
fn test_empty_key_rejected() {
    let (_temp, mut db) = setup_temp_db();

    assert!(matches!(
        db.store(b"", b"v", StoreMode::Upsert),
        Err(HashKvError::EmptyKey)
    ));
    assert!(matches!(db.fetch(b""), Err(HashKvError::EmptyKey)));
    assert!(matches!(db.delete(b""), Err(HashKvError::EmptyKey)));
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_then_fetch() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"key", b"value", StoreMode::Insert).unwrap();
    db.delete(b"key").unwrap();

    assert_eq!(db.fetch(b"key").unwrap(), None);
}

#[test]
fn test_delete_then_insert_reuses_slot() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut db = create_db(&path, 64);

    db.store(b"key", b"value", StoreMode::Insert).unwrap();
    db.delete(b"key").unwrap();
    let before = file_sizes(&path);

    db.store(b"key", b"other", StoreMode::Insert).unwrap();

    assert_eq!(file_sizes(&path), before);
    assert_eq!(db.fetch(b"key").unwrap().as_deref(), Some(&b"other"[..]));
}

#[test]
fn test_delete_miss_changes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut db = create_db(&path, 64);
    db.store(b"present", b"value", StoreMode::Insert).unwrap();
    db.store(b"gone", b"value", StoreMode::Insert).unwrap();
    db.delete(b"gone").unwrap();

    let index_before = fs::read(index_path(&path)).unwrap();
    let data_before = fs::read(data_path(&path)).unwrap();

    assert!(matches!(db.delete(b"absent"), Err(HashKvError::NotFound)));
    assert!(matches!(db.delete(b"gone"), Err(HashKvError::NotFound)));

    assert_eq!(fs::read(index_path(&path)).unwrap(), index_before);
    assert_eq!(fs::read(data_path(&path)).unwrap(), data_before);
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_iteration_skips_deleted() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"a", b"1", StoreMode::Insert).unwrap();
    db.store(b"b", b"2", StoreMode::Insert).unwrap();
    db.store(b"c", b"3", StoreMode::Insert).unwrap();
    db.delete(b"b").unwrap();

    let seen = collect(&mut db);

    let expected: HashMap<Vec<u8>, Vec<u8>> = [
        (b"a".to_vec(), b"1".to_vec()),
        (b"c".to_vec(), b"3".to_vec()),
    ]
    .into_iter()
    .collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_iteration_in_file_order() {
    let (_temp, mut db) = setup_temp_db();

    for key in ["z", "m", "a", "q"] {
        db.store(key.as_bytes(), b"v", StoreMode::Insert).unwrap();
    }

    let keys: Vec<Vec<u8>> = db.iter().map(|r| r.unwrap().0.to_vec()).collect();
    assert_eq!(keys, vec![b"z".to_vec(), b"m".to_vec(), b"a".to_vec(), b"q".to_vec()]);
}

#[test]
fn test_rewind_and_next_record() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"one", b"1", StoreMode::Insert).unwrap();
    db.store(b"two", b"2", StoreMode::Insert).unwrap();

    // open() rewinds
    let (key, value) = db.next_record().unwrap().unwrap();
    assert_eq!((&key[..], &value[..]), (&b"one"[..], &b"1"[..]));
    assert!(db.next_record().unwrap().is_some());
    assert!(db.next_record().unwrap().is_none());
    assert!(db.next_record().unwrap().is_none());

    db.rewind();
    let (key, _) = db.next_record().unwrap().unwrap();
    assert_eq!(&key[..], b"one");
    assert_eq!(db.stats().records_iterated, 3);
}

#[test]
fn test_iteration_empty_database() {
    let (_temp, mut db) = setup_temp_db();

    assert_eq!(db.iter().count(), 0);
}

#[test]
fn test_iteration_after_churn() {
    let (_temp, mut db) = setup_temp_db();
    let mut expected = HashMap::new();

    for round in 0..3 {
        for i in 0..40 {
            let key = format!("key{}", i);
            let value = "x".repeat((i * 7 + round * 13) % 50);
            db.store(key.as_bytes(), value.as_bytes(), StoreMode::Upsert)
                .unwrap();
            expected.insert(key.into_bytes(), value.into_bytes());
        }
        for i in (0..40).step_by(3 + round) {
            let key = format!("key{}", i);
            if expected.remove(key.as_bytes()).is_some() {
                db.delete(key.as_bytes()).unwrap();
            }
        }
    }

    assert_eq!(collect(&mut db), expected);
}

// =============================================================================
// Concrete Scenario
// =============================================================================

#[test]
fn test_two_bucket_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut db = create_db(&path, 2);
    let record = |key_len: u64| RECORD_HEADER_SIZE as u64 + key_len;

    db.store(b"x", b"1", StoreMode::Insert).unwrap();
    db.store(b"y", b"22", StoreMode::Insert).unwrap();
    let (index_len, data_len) = file_sizes(&path);
    assert_eq!(index_len, 32 + 2 * record(1));
    assert_eq!(data_len, 3);

    // "333" does not fit x's 1-byte slot: old record freed, new one appended
    db.store(b"x", b"333", StoreMode::Upsert).unwrap();
    assert_eq!(db.fetch(b"x").unwrap().as_deref(), Some(&b"333"[..]));
    let (index_len, data_len) = file_sizes(&path);
    assert_eq!(index_len, 32 + 3 * record(1));
    assert_eq!(data_len, 6);

    db.delete(b"y").unwrap();

    // z fits y's freed index slot and its 2-byte data slot
    db.store(b"z", b"4", StoreMode::Insert).unwrap();
    assert_eq!(file_sizes(&path), (index_len, data_len));
    assert_eq!(db.fetch(b"z").unwrap().as_deref(), Some(&b"4"[..]));
    assert_eq!(db.fetch(b"y").unwrap(), None);

    let stats = db.stats();
    assert_eq!(stats.store_appended, 2);
    assert_eq!(stats.store_relocated, 1);
    assert_eq!(stats.store_reused, 1);

    let seen = collect(&mut db);
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[&b"x".to_vec()], b"333".to_vec());
    assert_eq!(seen[&b"z".to_vec()], b"4".to_vec());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_persistence_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    {
        let mut db = create_db(&path, 8);
        db.store(b"kept", b"value", StoreMode::Insert).unwrap();
        db.store(b"removed", b"value", StoreMode::Insert).unwrap();
        db.delete(b"removed").unwrap();
        db.sync().unwrap();
        db.close().unwrap();
    }

    let mut db = Database::open_path(&path).unwrap();
    assert_eq!(db.fetch(b"kept").unwrap().as_deref(), Some(&b"value"[..]));
    assert_eq!(db.fetch(b"removed").unwrap(), None);

    // The free list survived too
    let before = file_sizes(&path);
    db.store(b"again", b"val", StoreMode::Insert).unwrap();
    assert_eq!(file_sizes(&path), before);
}

#[test]
fn test_drop_database() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    create_db(&path, 8).close().unwrap();
    assert!(index_path(&path).exists());

    hashkv::drop_database(&path).unwrap();

    assert!(!index_path(&path).exists());
    assert!(!data_path(&path).exists());

    // Dropping twice is fine
    hashkv::drop_database(&path).unwrap();
}

#[test]
fn test_stats_counts_operations() {
    let (_temp, mut db) = setup_temp_db();

    db.store(b"a", b"1", StoreMode::Insert).unwrap();
    let _ = db.store(b"a", b"1", StoreMode::Insert);
    db.fetch(b"a").unwrap();
    db.fetch(b"b").unwrap();
    db.delete(b"a").unwrap();
    let _ = db.delete(b"a");

    let stats = db.stats();
    assert_eq!(stats.store_appended, 1);
    assert_eq!(stats.store_errors, 1);
    assert_eq!(stats.fetch_hits, 1);
    assert_eq!(stats.fetch_misses, 1);
    assert_eq!(stats.delete_hits, 1);
    assert_eq!(stats.delete_misses, 1);
}

#[test]
fn test_accessors() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    let db = create_db(&path, 128);

    assert_eq!(db.path(), path.as_path());
    assert_eq!(db.bucket_count(), 128);
    assert!(db.config().create);
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn test_concurrent_handles() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    create_db(&path, 4).close().unwrap();

    crossbeam::scope(|s| {
        for t in 0..4 {
            let path = &path;
            s.spawn(move |_| {
                let mut db = Database::open_path(path).unwrap();
                for i in 0..50 {
                    let key = format!("thread{}_key{}", t, i);
                    let value = format!("thread{}_value{}", t, i);
                    db.store(key.as_bytes(), value.as_bytes(), StoreMode::Insert)
                        .unwrap();
                    // Churn the shared free list
                    if i % 5 == 0 {
                        db.delete(key.as_bytes()).unwrap();
                    }
                }
            });
        }
    })
    .unwrap();

    let mut db = Database::open_path(&path).unwrap();
    let mut expected = HashSet::new();
    for t in 0..4 {
        for i in 0..50 {
            let key = format!("thread{}_key{}", t, i);
            let result = db.fetch(key.as_bytes()).unwrap();
            if i % 5 == 0 {
                assert_eq!(result, None);
            } else {
                let value = format!("thread{}_value{}", t, i);
                assert_eq!(result.as_deref(), Some(value.as_bytes()));
                expected.insert(key.into_bytes());
            }
        }
    }

    let seen: HashSet<Vec<u8>> = collect(&mut db).into_keys().collect();
    assert_eq!(seen, expected);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn test_delete_unlinks_under_free_list_lock() {
    use std::fs::OpenOptions;
    use std::time::Duration;

    use bytes::BytesMut;
    use crossbeam::channel;
    use hashkv::index::{chain, IndexFile, FREE_LIST_SLOT};
    use hashkv::lock::LockMode;

    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut db = create_db(&path, 1);
    db.store(b"keep", b"1", StoreMode::Insert).unwrap();
    db.store(b"victim", b"2", StoreMode::Insert).unwrap();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(index_path(&path))
        .unwrap();
    let other = IndexFile::open(file, None).unwrap();
    let head_slot = other.table().slot_for_key(b"victim");
    let on_chain = |index: &IndexFile| {
        let mut key_buf = BytesMut::new();
        chain::walk(index, head_slot, &mut key_buf, |_, key| key == b"victim")
            .unwrap()
            .is_some()
    };

    // Another handle is busy with the free list
    let free_list = other.lock(FREE_LIST_SLOT, 1, LockMode::Exclusive).unwrap();
    let (tx, rx) = channel::bounded(1);

    crossbeam::scope(|s| {
        let db = &mut db;
        s.spawn(move |_| {
            tx.send(db.delete(b"victim")).unwrap();
        });

        // The delete is waiting and the record is still on its chain
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(on_chain(&other));

        free_list.release().unwrap();
        let result = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(result.is_ok());
    })
    .unwrap();

    assert!(!on_chain(&other));
    let keys: Vec<Vec<u8>> = db.iter().map(|r| r.unwrap().0.to_vec()).collect();
    assert_eq!(keys, vec![b"keep".to_vec()]);
}
