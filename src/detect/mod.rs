//! Change detection over a directory tree.
//!
//! [`ChangeDetector`] runs the cache protocol for every walked file:
//!
//! 1. **Classify** with the fresh mtime and size. `Unchanged` stops here
//!    unless `force_deep_check` is set.
//! 2. **Hash** the content. The same checksum as stored means the file was
//!    only touched; otherwise it was added or modified.
//! 3. **Confirm** the new observation (skipped in a dry run).
//!
//! Once every file is checked, stored keys the walk did not produce are
//! reported as removed and forgotten. Keys under a directory the walk could
//! not read are kept, and an interrupted pass skips this step entirely.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use filestamp::cache::FileStateCache;
//! use filestamp::detect::{ChangeDetector, DetectorConfig};
//!
//! let cache = Arc::new(FileStateCache::open(Path::new("site/.filestamp.sqlite")).unwrap());
//! let detector = ChangeDetector::new(cache, DetectorConfig::default());
//! let report = detector.detect(Path::new("site")).unwrap();
//! for (key, outcome) in report.changes() {
//!     println!("{} {}", outcome.marker(), key);
//! }
//! ```

pub mod detector;
pub mod report;

pub use detector::{ChangeDetector, DetectError, DetectorConfig};
pub use report::{Outcome, PathError, ScanReport};
