//! Directory walker implementation using jwalk for parallel traversal.
//!
//! # Overview
//!
//! [`Walker`] lists every regular file under a root, together with the
//! metadata the cache compares against. Directories matched by ignore
//! rules are pruned before jwalk descends into them.
//!
//! # Features
//!
//! - Parallel directory traversal using rayon thread pool
//! - Gitignore-style pattern matching via the `ignore` crate
//! - Hidden file filtering
//! - Exact-path exclusion (the cache store and its WAL side files)
//! - Graceful shutdown via atomic flag
//!
//! # Example
//!
//! ```no_run
//! use filestamp::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let config = WalkerConfig {
//!     skip_hidden: true,
//!     ignore_patterns: vec!["target/".to_string()],
//!     ..Default::default()
//! };
//!
//! let walker = Walker::new(Path::new("/home/user/project"), config);
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.key, file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;

use super::path_utils::cache_key;
use super::{FileEntry, ScanError, WalkerConfig};

/// Directory walker for parallel file discovery.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given path.
    ///
    /// The root is canonicalized when possible so that exclusions and cache
    /// keys do not depend on how the caller spelled it.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        let root = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut config = config;
        config.exclude_paths = config.exclude_paths.iter().map(|p| resolve(p)).collect();
        Self {
            root,
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker will stop iteration
    /// as soon as possible.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// The resolved root every key is relative to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Build gitignore matcher from config patterns and .gitignore file.
    fn build_gitignore(&self) -> Option<Gitignore> {
        let mut builder = GitignoreBuilder::new(&self.root);

        let gitignore_path = self.root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(e) = builder.add(&gitignore_path) {
                log::warn!(
                    "Failed to load .gitignore from {}: {}",
                    gitignore_path.display(),
                    e
                );
            } else {
                log::debug!("Loaded .gitignore from {}", gitignore_path.display());
            }
        }

        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if gitignore.is_empty() => None,
            Ok(gitignore) => Some(gitignore),
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Walk the directory tree, yielding file entries.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration. A root that does not exist or is not a directory yields a
    /// single error.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileEntry, ScanError>> + '_ {
        let root_error = match std::fs::metadata(&self.root) {
            Ok(m) if m.is_dir() => None,
            Ok(_) => Some(ScanError::NotADirectory(self.root.clone())),
            Err(e) => Some(io_to_scan_error(&self.root, e)),
        };

        let gitignore = Arc::new(self.build_gitignore());
        let prune_root = self.root.clone();
        let prune_rules = Arc::clone(&gitignore);

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(self.config.skip_hidden)
            .process_read_dir(move |_depth, _path, _read_dir_state, children| {
                // Prune ignored directories so their contents are never read
                children.retain(|child| match child {
                    Ok(entry) if entry.file_type().is_dir() => {
                        !is_ignored(&prune_root, &entry.path(), true, &prune_rules)
                    }
                    _ => true,
                });
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        let entries = root_error
            .is_none()
            .then(|| walk_dir.into_iter())
            .into_iter()
            .flatten();

        root_error
            .map(Err)
            .into_iter()
            .chain(entries.filter_map(move |entry_result| {
                if self.is_shutdown_requested() {
                    log::debug!("Walker: Shutdown requested, stopping iteration");
                    return None;
                }

                match entry_result {
                    Ok(entry) => {
                        let path = entry.path();
                        if path == self.root || entry.file_type().is_dir() {
                            return None;
                        }
                        if is_ignored(&self.root, &path, false, &gitignore) {
                            log::trace!("Ignoring file: {}", path.display());
                            return None;
                        }
                        if entry.file_type().is_symlink() && !self.config.follow_symlinks {
                            log::trace!("Skipping symlink: {}", path.display());
                            return None;
                        }
                        if self.config.exclude_paths.iter().any(|p| p == &path) {
                            log::trace!("Skipping excluded path: {}", path.display());
                            return None;
                        }
                        self.process_file_entry(path)
                    }
                    Err(e) => {
                        let path = e
                            .path()
                            .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
                        Some(Err(self.handle_jwalk_error(path, e)))
                    }
                }
            }))
    }

    /// Stat a file and build its entry.
    fn process_file_entry(&self, path: PathBuf) -> Option<Result<FileEntry, ScanError>> {
        let metadata = if self.config.follow_symlinks {
            std::fs::metadata(&path)
        } else {
            std::fs::symlink_metadata(&path)
        };

        let metadata = match metadata {
            Ok(m) => m,
            Err(e) => return Some(Err(self.handle_io_error(&path, e))),
        };

        if !metadata.is_file() {
            return None;
        }

        let Some(key) = cache_key(&self.root, &path) else {
            log::warn!("Skipping path without a valid UTF-8 key: {}", path.display());
            return None;
        };

        Some(
            build_entry(path, key, metadata.len(), metadata.modified())
                .inspect_err(|e| log::warn!("{}", e)),
        )
    }

    /// Handle I/O errors during file access.
    fn handle_io_error(&self, path: &Path, error: std::io::Error) -> ScanError {
        let err = io_to_scan_error(path, error);
        match &err {
            ScanError::NotFound(_) => {
                log::debug!("File not found (may have been deleted): {}", path.display());
            }
            other => log::warn!("{}", other),
        }
        err
    }

    /// Handle jwalk errors.
    fn handle_jwalk_error(&self, path: PathBuf, error: jwalk::Error) -> ScanError {
        log::warn!("Walker error for {}: {}", path.display(), error);
        match error.io_error().map(std::io::Error::kind) {
            Some(std::io::ErrorKind::PermissionDenied) => ScanError::PermissionDenied(path),
            Some(std::io::ErrorKind::NotFound) => ScanError::NotFound(path),
            _ => ScanError::Io {
                path,
                source: std::io::Error::other(error.to_string()),
            },
        }
    }
}

/// Map an I/O error to the matching scan error.
/// A file without a modification time cannot be compared against the
/// cache, so it is an error for that path rather than an entry.
fn build_entry(
    path: PathBuf,
    key: String,
    size: u64,
    modified: std::io::Result<SystemTime>,
) -> Result<FileEntry, ScanError> {
    match modified {
        Ok(modified) => Ok(FileEntry::new(path, key, size, modified)),
        Err(e) => Err(io_to_scan_error(&path, e)),
    }
}

fn io_to_scan_error(path: &Path, error: std::io::Error) -> ScanError {
    use std::io::ErrorKind;

    match error.kind() {
        ErrorKind::PermissionDenied => ScanError::PermissionDenied(path.to_path_buf()),
        ErrorKind::NotFound => ScanError::NotFound(path.to_path_buf()),
        _ => ScanError::Io {
            path: path.to_path_buf(),
            source: error,
        },
    }
}

/// Check a path against the ignore rules, relative to `root`.
fn is_ignored(root: &Path, path: &Path, is_dir: bool, gitignore: &Option<Gitignore>) -> bool {
    let Some(gi) = gitignore else {
        return false;
    };
    let relative_path = path.strip_prefix(root).unwrap_or(path);
    let path_str = relative_path.to_string_lossy();
    let normalized_path = if cfg!(windows) {
        path_str.replace('\\', "/")
    } else {
        path_str.into_owned()
    };
    gi.matched(normalized_path, is_dir).is_ignore()
}

/// Canonicalize `path`, or its parent when the file does not exist yet.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(p) = std::fs::canonicalize(path) {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
