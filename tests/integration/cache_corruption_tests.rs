//! Stores with bad rows or bad files: damage stays local to the affected
//! paths and is repaired by re-observing them.

use clap::Parser;
use filestamp::cache::{CacheError, Checksum, FileStateCache, Observation};
use filestamp::cli::Cli;
use filestamp::config::DEFAULT_STORE_NAME;
use filestamp::detect::{ChangeDetector, DetectorConfig};
use filestamp::error::ExitCode;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

/// Write rows an external tool could leave behind, bypassing CHECK
/// constraints.
fn plant(store: &Path, sql: &str) {
    let conn = Connection::open(store).unwrap();
    conn.execute_batch(&format!("PRAGMA ignore_check_constraints = ON; {sql};"))
        .unwrap();
}

#[test]
fn test_scan_all_continues_past_corrupt_rows() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("state.sqlite");
    let cache = FileStateCache::open(&store).unwrap();
    cache
        .confirm("a.txt", &Observation::new(1.0, 1), &Checksum::new(vec![1]))
        .unwrap();
    cache
        .confirm("c.txt", &Observation::new(1.0, 1), &Checksum::new(vec![3]))
        .unwrap();
    plant(&store, "INSERT INTO files VALUES ('b.txt', 1.0, -7, x'02')");

    let results: Vec<_> = cache.scan_all().collect();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().path, "a.txt");
    match &results[1] {
        Err(CacheError::RecordCorrupt { path, .. }) => assert_eq!(path, "b.txt"),
        other => panic!("expected a corrupt row, got {other:?}"),
    }
    assert_eq!(results[2].as_ref().unwrap().path, "c.txt");
}

#[test]
fn test_corrupt_row_is_rewritten_by_a_pass() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    let store = dir.path().join(DEFAULT_STORE_NAME);

    let cache = Arc::new(FileStateCache::open(&store).unwrap());
    let detector = ChangeDetector::new(Arc::clone(&cache), DetectorConfig::default());
    detector.detect(dir.path()).unwrap();

    plant(&store, "UPDATE files SET checksum = 'not a blob' WHERE path = 'a.txt'");
    assert!(cache.lookup("a.txt").unwrap_err().is_record_corrupt());

    let report = detector.detect(dir.path()).unwrap();
    assert_eq!(report.added, vec!["a.txt"]);
    assert!(report.errors.is_empty());

    let record = cache.lookup("a.txt").unwrap().unwrap();
    assert_eq!(record.checksum.as_bytes(), blake3::hash(b"alpha").as_bytes());
}

#[test]
fn test_corrupt_row_for_deleted_file_is_removed() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("keep.txt"), "keep").unwrap();
    let store = dir.path().join(DEFAULT_STORE_NAME);

    let cache = Arc::new(FileStateCache::open(&store).unwrap());
    plant(&store, "INSERT INTO files VALUES ('gone.txt', 'yesterday', 3, x'00')");

    let report = ChangeDetector::new(Arc::clone(&cache), DetectorConfig::default())
        .detect(dir.path())
        .unwrap();

    assert_eq!(report.removed, vec!["gone.txt"]);
    assert_eq!(cache.scan_all().filter(Result::is_err).count(), 0);
}

#[test]
fn test_list_command_reports_corrupt_rows() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("state.sqlite");
    let cache = FileStateCache::open(&store).unwrap();
    cache
        .confirm("ok.txt", &Observation::new(1.0, 1), &Checksum::new(vec![1]))
        .unwrap();
    cache.close().unwrap();
    plant(&store, "INSERT INTO files VALUES ('bad.txt', 1.0, 1, x'')");

    let cli = Cli::try_parse_from([
        "filestamp",
        "--quiet",
        "--cache",
        store.to_str().unwrap(),
        "list",
        "--output",
        "json",
    ])
    .unwrap();
    assert_eq!(filestamp::run_app(cli).unwrap(), ExitCode::PartialSuccess);
}

#[test]
fn test_garbage_store_fails_scan_without_touching_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    let store = dir.path().join(DEFAULT_STORE_NAME);
    fs::write(&store, vec![0xffu8; 4096]).unwrap();

    let cli = Cli::try_parse_from(["filestamp", "--quiet", "scan", dir.path().to_str().unwrap()])
        .unwrap();
    let err = filestamp::run_app(cli).unwrap_err();

    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<CacheError>(), Some(CacheError::StoreUnavailable { .. }))));
    assert_eq!(fs::read(&store).unwrap(), vec![0xffu8; 4096]);
}

#[test]
fn test_unusable_keys_do_not_abort_a_pass() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    fs::write(dir.path().join("b.txt"), "beta").unwrap();
    let store = dir.path().join(DEFAULT_STORE_NAME);

    let cache = Arc::new(FileStateCache::open(&store).unwrap());
    let detector = ChangeDetector::new(Arc::clone(&cache), DetectorConfig::default());
    detector.detect(dir.path()).unwrap();

    plant(&store, "INSERT INTO files VALUES (x'ff', 1.0, 1, x'01')");
    plant(&store, "INSERT INTO files VALUES (CAST(x'c328' AS TEXT), 1.0, 1, x'01')");

    let dry_run = ChangeDetector::new(
        Arc::clone(&cache),
        DetectorConfig::default().with_dry_run(true),
    )
    .detect(dir.path())
    .unwrap();
    assert_eq!(dry_run.unchanged, 2);
    assert_eq!(dry_run.removed.len(), 2);
    assert_eq!(cache.len().unwrap(), 4);

    let report = detector.detect(dir.path()).unwrap();
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.removed, vec!["\u{fffd}(".to_string(), "x'ff'".to_string()]);
    assert!(report.errors.is_empty());

    let paths: Vec<String> = cache.scan_all().map(|r| r.unwrap().path).collect();
    assert_eq!(paths, vec!["a.txt", "b.txt"]);
}
