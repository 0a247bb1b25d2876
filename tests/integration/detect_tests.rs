//! End-to-end passes over real trees.

use clap::Parser;
use filestamp::cache::{FileStateCache, Observation, Status};
use filestamp::cli::Cli;
use filestamp::config::DEFAULT_STORE_NAME;
use filestamp::detect::{ChangeDetector, DetectorConfig, ScanReport};
use filestamp::error::ExitCode;
use filestamp::scanner::WalkerConfig;
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn pin_mtime(path: &Path, secs: i64) {
    set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

/// A tree with three files and pinned mtimes.
fn setup_tree() -> TempDir {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    fs::write(dir.path().join("b.txt"), "bravo").unwrap();
    fs::write(dir.path().join("sub").join("c.txt"), "charlie").unwrap();
    for name in ["a.txt", "b.txt", "sub/c.txt"] {
        pin_mtime(&dir.path().join(name), 1_600_000_000);
    }
    dir
}

fn detector(cache: &Arc<FileStateCache>) -> ChangeDetector {
    ChangeDetector::new(Arc::clone(cache), DetectorConfig::default().with_threads(2))
}

fn pass(cache: &Arc<FileStateCache>, root: &Path) -> ScanReport {
    detector(cache).detect(root).unwrap()
}

#[test]
fn test_first_pass_records_every_file() {
    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());

    let report = pass(&cache, dir.path());

    assert_eq!(report.walked, 3);
    assert_eq!(report.added, vec!["a.txt", "b.txt", "sub/c.txt"]);
    assert_eq!(report.hashed, 3);
    assert_eq!(report.bytes_hashed, 17);
    assert_eq!(cache.len().unwrap(), 3);

    let record = cache.lookup("sub/c.txt").unwrap().unwrap();
    assert_eq!(record.size, 7);
    assert_eq!(record.modified_since_epoch_sec, 1_600_000_000.0);
    assert_eq!(record.checksum.as_bytes(), blake3::hash(b"charlie").as_bytes());
}

#[test]
fn test_unchanged_tree_is_not_rehashed() {
    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
    pass(&cache, dir.path());

    let report = pass(&cache, dir.path());
    assert_eq!(report.unchanged, 3);
    assert_eq!(report.hashed, 0);
    assert_eq!(report.changed_count(), 0);
}

#[test]
fn test_touch_without_content_change() {
    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
    pass(&cache, dir.path());

    let path = dir.path().join("a.txt");
    pin_mtime(&path, 1_700_000_000);

    let report = pass(&cache, dir.path());
    assert_eq!(report.touched, vec!["a.txt"]);
    assert!(!report.has_content_changes());
    assert_eq!(report.hashed, 1);

    // The new mtime was recorded, so the next pass skips the hash
    assert_eq!(
        cache
            .classify("a.txt", &Observation::new(1_700_000_000.0, 5))
            .unwrap(),
        Status::Unchanged
    );
    let report = pass(&cache, dir.path());
    assert_eq!(report.hashed, 0);
}

#[test]
fn test_content_change_is_modified() {
    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
    pass(&cache, dir.path());

    let path = dir.path().join("b.txt");
    fs::write(&path, "BRAVO").unwrap();
    pin_mtime(&path, 1_600_000_100);

    let report = pass(&cache, dir.path());
    assert_eq!(report.modified, vec!["b.txt"]);
    assert_eq!(report.unchanged, 2);
    assert_eq!(
        cache.lookup("b.txt").unwrap().unwrap().checksum.as_bytes(),
        blake3::hash(b"BRAVO").as_bytes()
    );
}

#[test]
fn test_same_size_same_mtime_needs_deep_check() {
    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
    pass(&cache, dir.path());

    // Rewritten in place with the mtime put back: metadata cannot see it
    let path = dir.path().join("a.txt");
    fs::write(&path, "ALPHA").unwrap();
    pin_mtime(&path, 1_600_000_000);

    let report = pass(&cache, dir.path());
    assert!(report.modified.is_empty());

    let deep = ChangeDetector::new(
        Arc::clone(&cache),
        DetectorConfig::default().with_force_deep_check(true),
    );
    let report = deep.detect(dir.path()).unwrap();
    assert_eq!(report.modified, vec!["a.txt"]);
    assert_eq!(report.hashed, 3);
    assert_eq!(report.unchanged, 2);
}

#[test]
fn test_deleted_file_is_removed() {
    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
    pass(&cache, dir.path());

    fs::remove_dir_all(dir.path().join("sub")).unwrap();

    let report = pass(&cache, dir.path());
    assert_eq!(report.removed, vec!["sub/c.txt"]);
    assert!(cache.lookup("sub/c.txt").unwrap().is_none());
    assert_eq!(cache.len().unwrap(), 2);
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
    let dry = ChangeDetector::new(
        Arc::clone(&cache),
        DetectorConfig::default().with_dry_run(true),
    );

    let report = dry.detect(dir.path()).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.added.len(), 3);
    assert!(cache.is_empty().unwrap());

    pass(&cache, dir.path());
    fs::remove_file(dir.path().join("a.txt")).unwrap();
    let report = dry.detect(dir.path()).unwrap();
    assert_eq!(report.removed, vec!["a.txt"]);
    assert!(cache.lookup("a.txt").unwrap().is_some());
}

#[test]
fn test_ignored_files_are_not_tracked() {
    let dir = setup_tree();
    fs::write(dir.path().join("scratch.tmp"), "tmp").unwrap();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());

    let config = DetectorConfig::default().with_walker_config(WalkerConfig {
        ignore_patterns: vec!["*.tmp".to_string()],
        ..WalkerConfig::default()
    });
    let report = ChangeDetector::new(Arc::clone(&cache), config)
        .detect(dir.path())
        .unwrap();

    assert_eq!(report.walked, 3);
    assert!(cache.lookup("scratch.tmp").unwrap().is_none());
}

#[test]
fn test_store_inside_root_is_not_tracked() {
    let dir = setup_tree();
    let store = dir.path().join(DEFAULT_STORE_NAME);
    let cache = Arc::new(FileStateCache::open(&store).unwrap());

    let first = pass(&cache, dir.path());
    let second = pass(&cache, dir.path());

    assert_eq!(first.walked, 3);
    assert_eq!(second.changed_count(), 0);
    assert!(cache.lookup(DEFAULT_STORE_NAME).unwrap().is_none());
}

#[test]
fn test_interrupted_pass_keeps_records() {
    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
    pass(&cache, dir.path());

    let flag = Arc::new(AtomicBool::new(true));
    let config = DetectorConfig::default().with_shutdown_flag(Arc::clone(&flag));
    let result = ChangeDetector::new(Arc::clone(&cache), config).detect(dir.path());

    assert!(result.is_err());
    assert_eq!(cache.len().unwrap(), 3);
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_does_not_remove_its_records() {
    use std::os::unix::fs::PermissionsExt;

    let dir = setup_tree();
    let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
    pass(&cache, dir.path());

    let sub = dir.path().join("sub");
    fs::set_permissions(&sub, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&sub).is_ok() {
        // Running with privileges that ignore permission bits
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let report = pass(&cache, dir.path());
    fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(report.has_errors());
    assert!(report.removed.is_empty());
    assert!(cache.lookup("sub/c.txt").unwrap().is_some());
}

#[test]
fn test_scan_command_exit_codes() {
    let dir = setup_tree();
    let root = dir.path().to_str().unwrap();

    let cli = Cli::try_parse_from(["filestamp", "--quiet", "scan", root]).unwrap();
    assert_eq!(filestamp::run_app(cli).unwrap(), ExitCode::Success);
    assert!(dir.path().join(DEFAULT_STORE_NAME).exists());

    let cache = FileStateCache::open_read_only(&dir.path().join(DEFAULT_STORE_NAME)).unwrap();
    assert_eq!(cache.len().unwrap(), 3);
}

#[test]
fn test_status_command_does_not_create_store() {
    let dir = setup_tree();
    let cli = Cli::try_parse_from([
        "filestamp",
        "--quiet",
        "status",
        dir.path().to_str().unwrap(),
        "--output",
        "json",
    ])
    .unwrap();

    assert_eq!(filestamp::run_app(cli).unwrap(), ExitCode::Success);
    assert!(!dir.path().join(DEFAULT_STORE_NAME).exists());
}

#[test]
fn test_scan_command_missing_root() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope");
    let cli = Cli::try_parse_from(["filestamp", "--quiet", "scan", missing.to_str().unwrap()])
        .unwrap();

    let err = filestamp::run_app(cli).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(!missing.exists());
}

#[test]
fn test_forget_command_drops_records() {
    let dir = setup_tree();
    let store = dir.path().join(DEFAULT_STORE_NAME);
    let root = dir.path().to_str().unwrap();

    let cli = Cli::try_parse_from(["filestamp", "--quiet", "scan", root]).unwrap();
    filestamp::run_app(cli).unwrap();

    let cli = Cli::try_parse_from([
        "filestamp",
        "--quiet",
        "--cache",
        store.to_str().unwrap(),
        "forget",
        "a.txt",
        "never-tracked.txt",
    ])
    .unwrap();
    assert_eq!(filestamp::run_app(cli).unwrap(), ExitCode::Success);

    let cache = FileStateCache::open(&store).unwrap();
    assert!(cache.lookup("a.txt").unwrap().is_none());
    assert_eq!(cache.len().unwrap(), 2);
}
