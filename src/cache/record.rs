//! Cache record definitions.
//!
//! A [`FileRecord`] is one row of the `files` table: the path key plus the
//! three observational fields written together by a confirm. An
//! [`Observation`] is the cheap half of that row (mtime and size), the part
//! a caller can produce from `stat` alone.

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Content digest of a file as of its last observation.
///
/// The cache does not care which algorithm produced the bytes, only that
/// the same algorithm is used for every confirm against one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(Vec<u8>);

impl Checksum {
    /// Wrap raw digest bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Digest length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the digest has no bytes. Empty digests are never stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lower-case hexadecimal rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a hexadecimal string produced by [`Checksum::to_hex`].
    ///
    /// Returns `None` for odd lengths or non-hex characters.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() % 2 != 0 {
            return None;
        }

        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| {
                hex.get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            })
            .collect::<Option<Vec<u8>>>()?;
        Some(Self(bytes))
    }
}

impl From<Vec<u8>> for Checksum {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<[u8; 32]> for Checksum {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<u64> for Checksum {
    /// Little-endian bytes of a 64-bit digest (xxHash-style checksums).
    fn from(value: u64) -> Self {
        Self(value.to_le_bytes().to_vec())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl ToSql for Checksum {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Checksum::from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid checksum hex: {hex}")))
    }
}

/// Filesystem metadata observed for a path: modification time and size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Modification time in fractional seconds since the UNIX epoch.
    pub modified_since_epoch_sec: f64,
    /// Size in bytes.
    pub size: u64,
}

impl Observation {
    /// Create an observation from explicit values.
    #[must_use]
    pub fn new(modified_since_epoch_sec: f64, size: u64) -> Self {
        Self {
            modified_since_epoch_sec,
            size,
        }
    }

    /// Create an observation from a modification time and size.
    #[must_use]
    pub fn from_system_time(modified: SystemTime, size: u64) -> Self {
        Self::new(epoch_seconds(modified), size)
    }

    /// Read the observation out of filesystem metadata.
    ///
    /// # Errors
    ///
    /// Fails when the platform or filesystem does not record modification
    /// times.
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        let modified = metadata.modified()?;
        Ok(Self::from_system_time(modified, metadata.len()))
    }
}

/// Convert a [`SystemTime`] to fractional seconds since the UNIX epoch.
///
/// Times before the epoch come out negative. Going through `f64` costs
/// well under a microsecond of precision for present-day timestamps.
#[must_use]
pub fn epoch_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    }
}

/// One tracked file as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Cache key (root-relative or absolute path string).
    pub path: String,
    /// Modification time at last observation, seconds since the UNIX epoch.
    pub modified_since_epoch_sec: f64,
    /// Size in bytes at last observation.
    pub size: u64,
    /// Content digest at last observation.
    pub checksum: Checksum,
}

impl FileRecord {
    /// Build a record from an observation and the checksum computed for it.
    #[must_use]
    pub fn new(path: impl Into<String>, observation: Observation, checksum: Checksum) -> Self {
        Self {
            path: path.into(),
            modified_since_epoch_sec: observation.modified_since_epoch_sec,
            size: observation.size,
            checksum,
        }
    }

    /// The metadata half of the record.
    #[must_use]
    pub fn observation(&self) -> Observation {
        Observation::new(self.modified_since_epoch_sec, self.size)
    }

    /// Exact comparison of mtime and size against a fresh observation.
    #[must_use]
    pub fn matches(&self, observed: &Observation) -> bool {
        self.size == observed.size
            && self.modified_since_epoch_sec == observed.modified_since_epoch_sec
    }
}

/// Classification of a path against its stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Stored mtime and size both match; the checksum is trusted as-is.
    Unchanged,
    /// mtime or size differ; hash the file and confirm.
    PossiblyChanged,
    /// No record for this path.
    New,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unchanged => write!(f, "unchanged"),
            Status::PossiblyChanged => write!(f, "possibly changed"),
            Status::New => write!(f, "new"),
        }
    }
}
