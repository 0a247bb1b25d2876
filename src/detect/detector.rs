//! The full-tree change-detection pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::cache::{CacheError, FileStateCache, Status};
use crate::progress::{ProgressCallback, PHASE_CHECKING, PHASE_WALKING};
use crate::scanner::path_utils::{cache_key, key_is_within};
use crate::scanner::{FileEntry, Hasher, Walker, WalkerConfig};

use super::report::{Outcome, PathError, ScanReport};

/// Errors that abort a pass. Per-file problems end up in
/// [`ScanReport::errors`] instead.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// A shutdown was requested before the pass started.
    #[error("Scan interrupted by user")]
    Interrupted,

    /// The provided path does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// The provided path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The store failed outside of a single record.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The hashing pool could not be built.
    #[error("Failed to build hashing thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Settings for a [`ChangeDetector`].
#[derive(Clone)]
pub struct DetectorConfig {
    /// Hashing workers. 0 lets rayon decide.
    pub threads: usize,
    /// Hash every file, even when mtime and size match.
    pub force_deep_check: bool,
    /// Classify and hash, but never write to the store.
    pub dry_run: bool,
    /// Walk settings.
    pub walker_config: WalkerConfig,
    /// Content hasher.
    pub hasher: Hasher,
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for DetectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorConfig")
            .field("threads", &self.threads)
            .field("force_deep_check", &self.force_deep_check)
            .field("dry_run", &self.dry_run)
            .field("walker_config", &self.walker_config)
            .field("shutdown_flag", &self.shutdown_flag)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            force_deep_check: false,
            dry_run: false,
            walker_config: WalkerConfig::default(),
            hasher: Hasher::new(),
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl DetectorConfig {
    /// Set the number of hashing threads.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Always hash, ignoring the mtime+size shortcut.
    #[must_use]
    pub fn with_force_deep_check(mut self, force: bool) -> Self {
        self.force_deep_check = force;
        self
    }

    /// Report without writing.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the walker configuration.
    #[must_use]
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    /// Use a specific hasher.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Hasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Result of checking one walked file.
enum FileCheck {
    Done { outcome: Outcome, hashed_bytes: Option<u64> },
    Failed(PathError),
    Skipped,
}

/// Drives classify, hash and confirm over a directory tree, then removes
/// records for files that disappeared.
///
/// The store's keys are relative to the walked root, so one store belongs
/// to one tree.
#[derive(Debug)]
pub struct ChangeDetector {
    cache: Arc<FileStateCache>,
    config: DetectorConfig,
}

impl ChangeDetector {
    /// Create a detector over `cache`.
    #[must_use]
    pub fn new(cache: Arc<FileStateCache>, config: DetectorConfig) -> Self {
        Self { cache, config }
    }

    /// The store this detector reads and updates.
    #[must_use]
    pub fn cache(&self) -> &Arc<FileStateCache> {
        &self.cache
    }

    /// Settings this detector was built with.
    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run one pass over `root`.
    ///
    /// # Errors
    ///
    /// Fails if `root` is not a directory, if a shutdown was requested before
    /// anything ran, if the hashing pool cannot be built, or if the store
    /// fails while listing records for removal detection.
    pub fn detect(&self, root: &Path) -> Result<ScanReport, DetectError> {
        let start_time = Instant::now();

        if !root.exists() {
            return Err(DetectError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(DetectError::NotADirectory(root.to_path_buf()));
        }
        if self.config.is_shutdown_requested() {
            return Err(DetectError::Interrupted);
        }

        let mut walker_config = self.config.walker_config.clone();
        let location = self.cache.location();
        if location != Path::new(":memory:") {
            for suffix in ["", "-wal", "-shm", "-journal"] {
                let mut side = location.as_os_str().to_owned();
                side.push(suffix);
                walker_config.exclude_paths.push(PathBuf::from(side));
            }
        }

        let mut walker = Walker::new(root, walker_config);
        if let Some(ref flag) = self.config.shutdown_flag {
            walker = walker.with_shutdown_flag(Arc::clone(flag));
        }

        let mut report = ScanReport::new(walker.root().to_path_buf(), self.config.dry_run);
        log::info!(
            "Checking {}{}",
            walker.root().display(),
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        let (files, failed_prefixes, walk_complete) = self.walk(&walker, &mut report);
        report.walked = files.len();

        let walked_keys: HashSet<String> = files.iter().map(|f| f.key.clone()).collect();
        self.check_files(files, &mut report)?;

        if self.config.is_shutdown_requested() {
            report.interrupted = true;
            log::info!("Interrupted; skipping removal detection");
        } else if !walk_complete {
            log::warn!("Walk of the root itself failed; skipping removal detection");
        } else {
            self.detect_removals(&walked_keys, &failed_prefixes, &mut report)?;
        }

        report.duration = start_time.elapsed();
        report.finalize();

        log::info!(
            "Checked {} files: {} unchanged, {} touched, {} added, {} modified, {} removed, {} errors",
            report.walked,
            report.unchanged,
            report.touched.len(),
            report.added.len(),
            report.modified.len(),
            report.removed.len(),
            report.errors.len()
        );

        Ok(report)
    }

    /// Collect walked files. Returns the files, the keys of directories the
    /// walk could not fully read, and whether the root itself was readable.
    fn walk(&self, walker: &Walker, report: &mut ScanReport) -> (Vec<FileEntry>, Vec<String>, bool) {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(PHASE_WALKING, 0);
        }

        let mut files = Vec::new();
        let mut failed_prefixes = Vec::new();
        let mut walk_complete = true;

        for result in walker.walk() {
            match result {
                Ok(file) => {
                    files.push(file);
                    if let Some(ref callback) = self.config.progress_callback {
                        if let Some(last) = files.last() {
                            callback.on_progress(files.len(), &last.key);
                        }
                    }
                }
                Err(e) => {
                    match cache_key(walker.root(), e.path()) {
                        Some(key) => failed_prefixes.push(key),
                        None => walk_complete = false,
                    }
                    report
                        .errors
                        .push(PathError::new(e.path().display().to_string(), &e));
                }
            }
        }

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(PHASE_WALKING);
        }

        (files, failed_prefixes, walk_complete)
    }

    /// Classify, hash and confirm every walked file on the hashing pool.
    fn check_files(&self, files: Vec<FileEntry>, report: &mut ScanReport) -> Result<(), DetectError> {
        if files.is_empty() {
            return Ok(());
        }

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(PHASE_CHECKING, files.len());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;
        let done = AtomicUsize::new(0);

        let results: Vec<(String, FileCheck)> = pool.install(|| {
            files
                .into_par_iter()
                .map(|file| {
                    if self.config.is_shutdown_requested() {
                        return (file.key, FileCheck::Skipped);
                    }
                    let check = self.check_file(&file);
                    if let Some(ref callback) = self.config.progress_callback {
                        let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                        callback.on_progress(current, &file.key);
                    }
                    (file.key, check)
                })
                .collect()
        });

        for (key, check) in results {
            match check {
                FileCheck::Done {
                    outcome,
                    hashed_bytes,
                } => {
                    if let Some(bytes) = hashed_bytes {
                        report.hashed += 1;
                        report.bytes_hashed += bytes;
                    }
                    report.record(key, outcome);
                }
                FileCheck::Failed(err) => report.errors.push(err),
                FileCheck::Skipped => {}
            }
        }

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(PHASE_CHECKING);
        }

        Ok(())
    }

    /// The per-file protocol: classify, hash when needed, confirm.
    fn check_file(&self, file: &FileEntry) -> FileCheck {
        let observed = file.observation();

        let status = match self.cache.classify(&file.key, &observed) {
            Ok(status) => status,
            Err(e) if e.is_record_corrupt() => {
                log::warn!("{}; re-observing as new", e);
                Status::New
            }
            Err(e) => {
                log::warn!("Failed to classify {}: {}", file.key, e);
                return FileCheck::Failed(PathError::new(file.key.as_str(), &e));
            }
        };
        log::trace!("{}: {}", file.key, status);

        if status == Status::Unchanged && !self.config.force_deep_check {
            return FileCheck::Done {
                outcome: Outcome::Unchanged,
                hashed_bytes: None,
            };
        }

        let checksum = match self.config.hasher.checksum(&file.path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to hash {}: {}", file.path.display(), e);
                return FileCheck::Failed(PathError::new(file.key.as_str(), &e));
            }
        };
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_item_completed(file.size);
        }

        let same_content = match self.cache.matches_checksum(&file.key, observed.size, &checksum) {
            Ok(same) => same,
            Err(e) => return FileCheck::Failed(PathError::new(file.key.as_str(), &e)),
        };

        let outcome = match (same_content, status) {
            (true, Status::Unchanged) => Outcome::Unchanged,
            (true, _) => Outcome::Touched,
            (false, Status::New) => Outcome::Added,
            (false, _) => Outcome::Modified,
        };

        // The observation predates the hash; if the file moved in between,
        // the next pass sees new metadata and hashes again.
        if outcome.needs_confirm() && !self.config.dry_run {
            if let Err(e) = self.cache.confirm(&file.key, &observed, &checksum) {
                log::warn!("Failed to record {}: {}", file.key, e);
                return FileCheck::Failed(PathError::new(file.key.as_str(), &e));
            }
        }

        FileCheck::Done {
            outcome,
            hashed_bytes: Some(file.size),
        }
    }

    /// Stored keys that the walk did not see are removed.
    fn detect_removals(
        &self,
        walked_keys: &HashSet<String>,
        failed_prefixes: &[String],
        report: &mut ScanReport,
    ) -> Result<(), DetectError> {
        let mut gone = Vec::new();
        let mut invalid_keys = Vec::new();

        for record in self.cache.scan_all() {
            let key = match record {
                Ok(record) => record.path,
                Err(CacheError::RecordCorrupt { path, .. }) => path,
                Err(CacheError::KeyCorrupt { key, reason }) => {
                    log::warn!("Dropping unusable cache key {}: {}", key, reason);
                    invalid_keys.push(key);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if walked_keys.contains(&key) {
                continue;
            }
            if failed_prefixes.iter().any(|p| key_is_within(&key, p)) {
                log::debug!("Keeping {}: its directory could not be read", key);
                continue;
            }
            gone.push(key);
        }

        for key in gone {
            if self.config.dry_run {
                report.record(key, Outcome::Removed);
                continue;
            }
            match self.cache.remove(&key) {
                Ok(_) => report.record(key, Outcome::Removed),
                Err(e) => {
                    log::warn!("Failed to forget {}: {}", key, e);
                    report.errors.push(PathError::new(key, &e));
                }
            }
        }

        if invalid_keys.is_empty() {
            return Ok(());
        }
        if !self.config.dry_run {
            if let Err(e) = self.cache.remove_invalid_keys() {
                log::warn!("Failed to drop unusable cache keys: {}", e);
                for key in invalid_keys {
                    report.errors.push(PathError::new(key, &e));
                }
                return Ok(());
            }
        }
        for key in invalid_keys {
            report.record(key, Outcome::Removed);
        }

        Ok(())
    }
}
