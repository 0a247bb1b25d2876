//! Scanner module for directory traversal and file hashing.
//!
//! This is the collaborator side of the cache: it produces the observations
//! and checksums the cache stores. The cache itself never calls into it.
//!
//! - [`walker`]: parallel directory walking with jwalk and gitignore rules
//! - [`hasher`]: BLAKE3 content checksums (streamed or memory-mapped)
//! - [`path_utils`]: root-relative, NFC-normalized cache keys
//!
//! # Example
//!
//! ```no_run
//! use filestamp::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("."), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.key, file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hasher;
pub mod path_utils;
pub mod walker;

use std::path::PathBuf;
use std::time::SystemTime;

use crate::cache::Observation;

pub use hasher::Hasher;
pub use walker::Walker;

/// A regular file found by the walker.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Cache key: root-relative, `/`-separated, NFC
    pub key: String,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl FileEntry {
    /// Create a new FileEntry.
    #[must_use]
    pub fn new(path: PathBuf, key: String, size: u64, modified: SystemTime) -> Self {
        Self {
            path,
            key,
            size,
            modified,
        }
    }

    /// The metadata half of a cache record for this file.
    #[must_use]
    pub fn observation(&self) -> Observation {
        Observation::from_system_time(self.modified, self.size)
    }
}

/// Configuration for directory walking.
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Glob patterns to ignore (gitignore-style), on top of `.gitignore`.
    pub ignore_patterns: Vec<String>,

    /// Exact paths never reported, such as the cache store itself.
    pub exclude_paths: Vec<PathBuf>,
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// The path the error is about.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            ScanError::PermissionDenied(p) | ScanError::NotFound(p) | ScanError::NotADirectory(p) => p,
            ScanError::Io { path, .. } => path,
        }
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
