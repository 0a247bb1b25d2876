//! Change-detection cache.
//!
//! This module persists, for every tracked path, the modification time,
//! size and content checksum last observed, so a caller can skip rehashing
//! files whose metadata has not moved.
//!
//! # Architecture
//!
//! * [`record`]: the data model ([`FileRecord`], [`Observation`], [`Checksum`], [`Status`]).
//! * [`migrations`]: versioned schema steps and the [`Migrator`] that applies them.
//! * [`database`]: [`FileStateCache`], the SQLite-backed store and its operations.
//!
//! # Protocol
//!
//! 1. [`FileStateCache::classify`] the path with a fresh `stat`.
//! 2. `Unchanged`: reuse the stored checksum. Anything else: hash the file
//!    and [`FileStateCache::confirm`] the new observation.
//! 3. [`FileStateCache::remove`] paths that no longer exist, found by
//!    comparing [`FileStateCache::scan_all`] against a directory walk.
//!
//! The mtime+size check can be fooled by a same-size rewrite inside one
//! timestamp tick. Callers that need certainty hash every file and confirm.
//!
//! # Example
//!
//! ```
//! use filestamp::cache::{Checksum, FileStateCache, Observation, Status};
//!
//! let cache = FileStateCache::open_in_memory().unwrap();
//! let observed = Observation::new(100.5, 10);
//! assert_eq!(cache.classify("/a.txt", &observed).unwrap(), Status::New);
//!
//! cache.confirm("/a.txt", &observed, &Checksum::new(vec![0xab; 32])).unwrap();
//! assert_eq!(cache.classify("/a.txt", &observed).unwrap(), Status::Unchanged);
//! ```

pub mod database;
pub mod migrations;
pub mod record;

pub use database::{CacheError, CacheOptions, CacheResult, FileStateCache, Records};
pub use migrations::{MigrationError, MigrationReport, Migrator, LATEST_VERSION};
pub use record::{epoch_seconds, Checksum, FileRecord, Observation, Status};
