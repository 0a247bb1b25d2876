//! Results of a change-detection pass.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// What a pass concluded about one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Metadata matches the record (or, under a deep check, so does the content).
    Unchanged,
    /// Metadata moved but the checksum is the same.
    Touched,
    /// No record existed.
    Added,
    /// Content differs from the record.
    Modified,
    /// Recorded, but no longer on disk.
    Removed,
}

impl Outcome {
    /// Whether this outcome writes to the store.
    #[must_use]
    pub fn needs_confirm(self) -> bool {
        matches!(self, Outcome::Touched | Outcome::Added | Outcome::Modified)
    }

    /// Single-letter marker used by the text output.
    #[must_use]
    pub fn marker(self) -> char {
        match self {
            Outcome::Unchanged => '=',
            Outcome::Touched => 'T',
            Outcome::Added => 'A',
            Outcome::Modified => 'M',
            Outcome::Removed => 'D',
        }
    }
}

/// A path the pass could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathError {
    /// Cache key or filesystem path.
    pub path: String,
    /// Human-readable cause.
    pub message: String,
}

impl PathError {
    pub(crate) fn new(path: impl Into<String>, err: &dyn std::fmt::Display) -> Self {
        Self {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Summary of one pass over a tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Root that was walked.
    pub root: PathBuf,
    /// Regular files found by the walk.
    pub walked: usize,
    /// Files classified unchanged.
    pub unchanged: usize,
    /// Keys whose metadata changed but content did not.
    pub touched: Vec<String>,
    /// Keys seen for the first time.
    pub added: Vec<String>,
    /// Keys whose content changed.
    pub modified: Vec<String>,
    /// Keys removed from the store (or that would be, in a dry run).
    pub removed: Vec<String>,
    /// Per-path failures. They do not stop the pass.
    pub errors: Vec<PathError>,
    /// Files whose content was hashed.
    pub hashed: usize,
    /// Bytes read while hashing.
    pub bytes_hashed: u64,
    /// The pass was stopped by a shutdown request.
    pub interrupted: bool,
    /// Nothing was written to the store.
    pub dry_run: bool,
    /// Wall-clock time of the pass.
    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

impl ScanReport {
    /// Empty report for `root`.
    #[must_use]
    pub fn new(root: PathBuf, dry_run: bool) -> Self {
        Self {
            root,
            dry_run,
            ..Self::default()
        }
    }

    /// File `key` ended with `outcome`.
    pub fn record(&mut self, key: String, outcome: Outcome) {
        match outcome {
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Touched => self.touched.push(key),
            Outcome::Added => self.added.push(key),
            Outcome::Modified => self.modified.push(key),
            Outcome::Removed => self.removed.push(key),
        }
    }

    /// Touched + added + modified + removed.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.touched.len() + self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Whether any content was added, modified or removed.
    #[must_use]
    pub fn has_content_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty())
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Every changed key with its outcome, in key order.
    #[must_use]
    pub fn changes(&self) -> Vec<(&str, Outcome)> {
        let mut all: Vec<(&str, Outcome)> = [
            (&self.touched, Outcome::Touched),
            (&self.added, Outcome::Added),
            (&self.modified, Outcome::Modified),
            (&self.removed, Outcome::Removed),
        ]
        .into_iter()
        .flat_map(|(keys, outcome)| keys.iter().map(move |k| (k.as_str(), outcome)))
        .collect();
        all.sort_unstable_by(|a, b| a.0.cmp(b.0));
        all
    }

    /// Sort every list so output does not depend on thread scheduling.
    pub(crate) fn finalize(&mut self) {
        self.touched.sort_unstable();
        self.added.sort_unstable();
        self.modified.sort_unstable();
        self.removed.sort_unstable();
        self.errors.sort_by(|a, b| a.path.cmp(&b.path));
    }
}
