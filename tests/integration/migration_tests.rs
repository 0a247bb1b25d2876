use clap::Parser;
use filestamp::cache::{
    CacheError, Checksum, FileRecord, FileStateCache, MigrationError, Migrator, Observation,
    Status, LATEST_VERSION,
};
use filestamp::cli::Cli;
use filestamp::error::ExitCode;
use rusqlite::Connection;
use std::path::Path;
use std::thread;
use tempfile::tempdir;

/// A store as written by the tool generation that named the mtime column
/// `datetime`.
fn write_legacy_store(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE files (
            path TEXT PRIMARY KEY NOT NULL,
            datetime REAL NOT NULL,
            size INTEGER NOT NULL,
            checksum BLOB NOT NULL
        );
        CREATE INDEX files_path_idx ON files (path);
        INSERT INTO files VALUES ('kept.txt', 1000.5, 4, x'0102');
        INSERT INTO files VALUES ('bad.txt', 1000.0, -1, x'03');
        PRAGMA user_version = 1;",
    )
    .unwrap();
}

fn user_version(path: &Path) -> u32 {
    let conn = Connection::open(path).unwrap();
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap()
}

#[test]
fn test_open_upgrades_legacy_store() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("legacy.sqlite");
    write_legacy_store(&store);

    let cache = FileStateCache::open(&store).unwrap();
    assert_eq!(cache.schema_version().unwrap(), LATEST_VERSION);

    let record = cache.lookup("kept.txt").unwrap().unwrap();
    assert_eq!(record.modified_since_epoch_sec, 1000.5);
    assert_eq!(record.size, 4);
    assert_eq!(
        cache
            .classify("kept.txt", &Observation::new(1000.5, 4))
            .unwrap(),
        Status::Unchanged
    );
    // Rows that break the record invariants are not carried over
    assert!(cache.lookup("bad.txt").unwrap().is_none());
    cache.close().unwrap();

    assert_eq!(user_version(&store), LATEST_VERSION);
}

#[test]
fn test_read_only_refuses_outdated_store() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("legacy.sqlite");
    write_legacy_store(&store);

    let err = FileStateCache::open_read_only(&store).unwrap_err();
    assert!(matches!(err, CacheError::Migration(_)), "{err}");
    assert_eq!(user_version(&store), 1);
}

#[test]
fn test_newer_store_is_left_untouched() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("future.sqlite");
    {
        let conn = Connection::open(&store).unwrap();
        conn.execute_batch("CREATE TABLE files (path TEXT PRIMARY KEY); PRAGMA user_version = 99;")
            .unwrap();
    }

    let err = FileStateCache::open(&store).unwrap_err();
    assert!(
        matches!(
            err,
            CacheError::Migration(MigrationError::StoreTooNew { found: 99, .. })
        ),
        "{err}"
    );
    assert_eq!(user_version(&store), 99);
}

#[test]
fn test_concurrent_first_open_migrates_once() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("shared.sqlite");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                let cache = FileStateCache::open(&store).unwrap();
                cache.schema_version().unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), LATEST_VERSION);
    }
    assert_eq!(user_version(&store), LATEST_VERSION);
}

#[test]
fn test_migrator_on_file_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("state.sqlite");

    let mut conn = Connection::open(&store).unwrap();
    let first = Migrator::default().migrate(&mut conn).unwrap();
    let second = Migrator::default().migrate(&mut conn).unwrap();

    assert_eq!(first.from, 0);
    assert_eq!(first.applied, (1..=LATEST_VERSION).collect::<Vec<_>>());
    assert!(second.is_noop());
    assert_eq!(second.to, LATEST_VERSION);
}

#[test]
fn test_migrating_populated_store_keeps_records() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("legacy.sqlite");
    write_legacy_store(&store);

    let cache = FileStateCache::open(&store).unwrap();
    cache
        .confirm("new.txt", &Observation::new(2000.25, 9), &Checksum::new(vec![9, 9]))
        .unwrap();
    cache
        .confirm("sub/deep.txt", &Observation::new(-5.0, 0), &Checksum::new(vec![1]))
        .unwrap();
    let before: Vec<FileRecord> = cache.scan_all().map(Result::unwrap).collect();
    assert_eq!(before.len(), 3);

    assert!(cache.migrate().unwrap().is_noop());
    assert_eq!(cache.scan_all().map(Result::unwrap).collect::<Vec<_>>(), before);
    cache.close().unwrap();

    let mut conn = Connection::open(&store).unwrap();
    let report = Migrator::default().migrate(&mut conn).unwrap();
    assert!(report.is_noop());
    assert_eq!(report.from, LATEST_VERSION);
    conn.close().unwrap();

    let reopened = FileStateCache::open(&store).unwrap();
    assert_eq!(reopened.scan_all().map(Result::unwrap).collect::<Vec<_>>(), before);
    assert_eq!(user_version(&store), LATEST_VERSION);
}

#[test]
fn test_migrate_command_upgrades_store() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("legacy.sqlite");
    write_legacy_store(&store);

    let cli = Cli::try_parse_from([
        "filestamp",
        "--quiet",
        "--cache",
        store.to_str().unwrap(),
        "migrate",
    ])
    .unwrap();
    assert_eq!(filestamp::run_app(cli).unwrap(), ExitCode::Success);
    assert_eq!(user_version(&store), LATEST_VERSION);

    // Running it again is a no-op
    let cli = Cli::try_parse_from([
        "filestamp",
        "--quiet",
        "--cache",
        store.to_str().unwrap(),
        "migrate",
    ])
    .unwrap();
    assert_eq!(filestamp::run_app(cli).unwrap(), ExitCode::Success);
}
