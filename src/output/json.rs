//! JSON output for scan reports and record listings.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "report": {
//!     "root": "/srv/site",
//!     "walked": 120,
//!     "unchanged": 117,
//!     "touched": [],
//!     "added": ["blog/new.html"],
//!     "modified": ["index.html"],
//!     "removed": ["old.css"],
//!     "errors": [],
//!     "hashed": 3,
//!     "bytes_hashed": 48213,
//!     "interrupted": false,
//!     "dry_run": false,
//!     "duration_ms": 41
//!   },
//!   "exit_code": 0,
//!   "exit_code_name": "FS000"
//! }
//! ```

use std::io::Write;

use serde::Serialize;

use crate::cache::{FileRecord, MigrationReport};
use crate::detect::{PathError, ScanReport};
use crate::error::ExitCode;

use super::format_mtime;

/// A scan or status result.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput<'a> {
    /// The pass result
    pub report: &'a ScanReport,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "FS000")
    pub exit_code_name: &'static str,
}

impl<'a> JsonOutput<'a> {
    /// Wrap a report with the exit code it produced.
    #[must_use]
    pub fn new(report: &'a ScanReport, exit_code: ExitCode) -> Self {
        Self {
            report,
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix(),
        }
    }

    /// Serialize to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }

    /// Write JSON and a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        write_json(writer, &self.to_json(pretty)?)
    }
}

/// One stored record, for `list`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRecord {
    /// Cache key
    pub path: String,
    /// Seconds since the UNIX epoch
    pub modified_since_epoch_sec: f64,
    /// RFC 3339 rendering of the mtime
    pub modified: String,
    /// Size in bytes
    pub size: u64,
    /// Hex checksum
    pub checksum: String,
}

impl From<&FileRecord> for JsonRecord {
    fn from(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            modified_since_epoch_sec: record.modified_since_epoch_sec,
            modified: format_mtime(record.modified_since_epoch_sec),
            size: record.size,
            checksum: record.checksum.to_hex(),
        }
    }
}

/// The full store listing.
#[derive(Debug, Clone, Serialize)]
pub struct JsonListing {
    /// Schema version of the store
    pub schema_version: u32,
    /// Readable records, in key order
    pub records: Vec<JsonRecord>,
    /// Rows that could not be read
    pub corrupt: Vec<PathError>,
}

impl JsonListing {
    /// Build a listing.
    #[must_use]
    pub fn new(schema_version: u32, records: &[FileRecord], corrupt: Vec<PathError>) -> Self {
        Self {
            schema_version,
            records: records.iter().map(JsonRecord::from).collect(),
            corrupt,
        }
    }

    /// Write JSON and a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        write_json(writer, &json)
    }
}

/// Write a migration report as JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_migration<W: Write>(
    report: &MigrationReport,
    writer: &mut W,
) -> Result<(), JsonOutputError> {
    write_json(writer, &serde_json::to_string(report)?)
}

fn write_json<W: Write>(writer: &mut W, json: &str) -> Result<(), JsonOutputError> {
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error during JSON generation: {0}")]
    Io(#[from] std::io::Error),
}
