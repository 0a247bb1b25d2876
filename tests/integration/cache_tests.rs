use filestamp::cache::{CacheError, Checksum, FileStateCache, Observation, Status};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn checksum(byte: u8) -> Checksum {
    Checksum::new(vec![byte; 32])
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("state.sqlite");

    let cache = FileStateCache::open(&store).unwrap();
    cache
        .confirm("a.txt", &Observation::new(1_700_000_000.25, 12), &checksum(1))
        .unwrap();
    cache
        .confirm("dir/b.txt", &Observation::new(1_700_000_001.0, 0), &checksum(2))
        .unwrap();
    cache.close().unwrap();

    let cache = FileStateCache::open(&store).unwrap();
    let record = cache.lookup("a.txt").unwrap().unwrap();
    assert_eq!(record.modified_since_epoch_sec, 1_700_000_000.25);
    assert_eq!(record.size, 12);
    assert_eq!(record.checksum, checksum(1));
    assert_eq!(
        cache
            .classify("dir/b.txt", &Observation::new(1_700_000_001.0, 0))
            .unwrap(),
        Status::Unchanged
    );
    assert_eq!(cache.len().unwrap(), 2);
}

#[test]
fn test_open_creates_parent_directories() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("nested").join("deeper").join("state.sqlite");

    let cache = FileStateCache::open(&store).unwrap();
    assert!(store.exists());
    assert_eq!(cache.location(), store.as_path());
}

#[test]
fn test_non_database_file_is_unavailable() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("state.sqlite");
    fs::write(&store, "this is a plain text file, definitely not SQLite").unwrap();

    let err = FileStateCache::open(&store).unwrap_err();
    assert!(
        matches!(err, CacheError::StoreUnavailable { .. }),
        "unexpected error: {err}"
    );
    // The file is left alone
    assert_eq!(
        fs::read_to_string(&store).unwrap(),
        "this is a plain text file, definitely not SQLite"
    );
}

#[test]
fn test_read_only_sees_writer_and_refuses_writes() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("state.sqlite");

    let writer = FileStateCache::open(&store).unwrap();
    writer
        .confirm("a.txt", &Observation::new(5.0, 1), &checksum(1))
        .unwrap();

    let reader = FileStateCache::open_read_only(&store).unwrap();
    assert!(reader.lookup("a.txt").unwrap().is_some());
    assert!(reader
        .confirm("b.txt", &Observation::new(5.0, 1), &checksum(2))
        .is_err());
    assert!(reader.lookup("b.txt").unwrap().is_none());

    writer
        .confirm("c.txt", &Observation::new(6.0, 2), &checksum(3))
        .unwrap();
    assert!(reader.lookup("c.txt").unwrap().is_some());
}

#[test]
fn test_read_only_open_of_missing_store_fails() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("absent.sqlite");

    assert!(FileStateCache::open_read_only(&store).is_err());
    assert!(!store.exists());
}

#[test]
fn test_shared_cache_across_threads() {
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..50u64 {
                    let key = format!("t{t}/file{i:03}");
                    cache
                        .confirm(&key, &Observation::new(i as f64, i), &checksum(t))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len().unwrap(), 200);
    let keys: Vec<String> = cache.scan_all().map(|r| r.unwrap().path).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn test_two_handles_on_one_file() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("state.sqlite");
    let first = FileStateCache::open(&store).unwrap();
    let second = FileStateCache::open(&store).unwrap();

    let a = thread::spawn(move || {
        for i in 0..40u64 {
            first
                .confirm(&format!("a{i}"), &Observation::new(1.0, i), &checksum(1))
                .unwrap();
        }
    });
    let b = thread::spawn(move || {
        for i in 0..40u64 {
            second
                .confirm(&format!("b{i}"), &Observation::new(1.0, i), &checksum(2))
                .unwrap();
        }
    });
    a.join().unwrap();
    b.join().unwrap();

    let cache = FileStateCache::open(&store).unwrap();
    assert_eq!(cache.len().unwrap(), 80);
}

#[test]
fn test_remove_then_classify_is_new() {
    let dir = tempdir().unwrap();
    let cache = FileStateCache::open(&dir.path().join("state.sqlite")).unwrap();
    let observed = Observation::new(10.0, 3);

    cache.confirm("gone.txt", &observed, &checksum(9)).unwrap();
    assert!(cache.remove("gone.txt").unwrap());
    assert!(!cache.remove("gone.txt").unwrap());
    assert_eq!(cache.classify("gone.txt", &observed).unwrap(), Status::New);
}

#[test]
fn test_clear_empties_store() {
    let cache = FileStateCache::open_in_memory().unwrap();
    for i in 0..5u64 {
        cache
            .confirm(&format!("f{i}"), &Observation::new(0.0, i), &checksum(0))
            .unwrap();
    }
    assert_eq!(cache.clear().unwrap(), 5);
    assert!(cache.is_empty().unwrap());
    assert_eq!(cache.scan_all().count(), 0);
}
