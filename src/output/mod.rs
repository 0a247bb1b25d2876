//! Output formatters for scan reports and store listings.
//!
//! - [`text`]: one line per changed key plus a summary
//! - [`json`]: machine-readable output for scripting
//!
//! # Example
//!
//! ```no_run
//! use filestamp::cache::FileStateCache;
//! use filestamp::detect::{ChangeDetector, DetectorConfig};
//! use filestamp::error::ExitCode;
//! use filestamp::output::JsonOutput;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let cache = Arc::new(FileStateCache::open_in_memory().unwrap());
//! let report = ChangeDetector::new(cache, DetectorConfig::default())
//!     .detect(Path::new("."))
//!     .unwrap();
//! println!("{}", JsonOutput::new(&report, ExitCode::Success).to_json(true).unwrap());
//! ```

pub mod json;
pub mod text;

pub use json::{JsonListing, JsonOutput, JsonOutputError, JsonRecord};
pub use text::TextOutput;

use chrono::{DateTime, SecondsFormat, Utc};

/// Render fractional epoch seconds as RFC 3339 UTC.
///
/// Values chrono cannot represent are printed as the raw number.
#[must_use]
pub fn format_mtime(seconds: f64) -> String {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    if !whole.is_finite() || whole.abs() > i64::MAX as f64 {
        return seconds.to_string();
    }
    match DateTime::<Utc>::from_timestamp(whole as i64, nanos) {
        Some(time) => time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => seconds.to_string(),
    }
}

/// Human-readable byte count (binary units).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
