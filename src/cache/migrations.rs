//! Versioned schema migrations for the file-state store.
//!
//! The schema version is kept in `PRAGMA user_version`; `0` is an empty
//! database. Each [`Migration`] runs inside its own exclusive transaction
//! together with the version bump, so a failed step leaves the store at the
//! previous version with none of the step's effects applied, and two
//! processes migrating the same file serialize on the database lock.
//!
//! # History
//!
//! | version | step |
//! |---|---|
//! | 1 | create `files` with an explicit index on `path` |
//! | 2 | rebuild stores from the `datetime` lineage into the canonical shape |
//! | 3 | drop explicit indexes on `path` (the primary key already has one) |
//!
//! Stores written by the older tool under the `datetime` column name were
//! also recorded at version 1; step 2 is where that lineage joins the
//! canonical one.

use std::fmt;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;

/// Schema version produced by [`history`].
pub const LATEST_VERSION: u32 = 3;

/// Canonical `files` table. Shared by step 1 and the legacy rebuild so both
/// leave identical SQL in `sqlite_master` (SQLite strips `IF NOT EXISTS`).
const FILES_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY NOT NULL,
    modified_since_epoch_sec REAL NOT NULL,
    size INTEGER NOT NULL CHECK (size >= 0),
    checksum BLOB NOT NULL
)";

/// Columns of the canonical table, in declaration order.
pub const FILES_COLUMNS: [&str; 4] = ["path", "modified_since_epoch_sec", "size", "checksum"];

/// Copies legacy rows, converting the `datetime` column to epoch seconds.
/// Text that is a plain decimal number is already epoch seconds; other text
/// is parsed as a date. Rows that cannot be converted or that break the
/// record invariants are left behind.
const LEGACY_COPY_SQL: &str = "INSERT INTO files (path, modified_since_epoch_sec, size, checksum)
SELECT path, mtime, size, checksum FROM (
    SELECT path,
           CASE typeof(datetime)
               WHEN 'real' THEN datetime
               WHEN 'integer' THEN CAST(datetime AS REAL)
               WHEN 'text' THEN CASE
                   WHEN ltrim(trim(datetime), '+-') GLOB '*[0-9]*'
                        AND ltrim(trim(datetime), '+-') NOT GLOB '*[^0-9.]*'
                        AND datetime NOT GLOB '*.*.*'
                   THEN CAST(trim(datetime) AS REAL)
                   ELSE (julianday(datetime) - 2440587.5) * 86400.0
               END
           END AS mtime,
           size,
           checksum
    FROM files_legacy
)
WHERE path IS NOT NULL
  AND mtime IS NOT NULL
  AND typeof(size) = 'integer' AND size >= 0
  AND typeof(checksum) = 'blob' AND length(checksum) > 0";

type StepFn = fn(&Transaction<'_>) -> rusqlite::Result<()>;

/// A single schema-evolution step.
#[derive(Clone, Copy)]
pub struct Migration {
    /// Version recorded once this step has been applied.
    pub version: u32,
    /// Human-readable summary, used in logs and errors.
    pub description: &'static str,
    apply: StepFn,
}

impl Migration {
    /// Create a step from a version, a description and the transformation.
    #[must_use]
    pub const fn new(version: u32, description: &'static str, apply: StepFn) -> Self {
        Self {
            version,
            description,
            apply,
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Errors raised while bringing a store to a schema version.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The store was written by a newer, incompatible tool.
    #[error("Store schema version {found} is newer than supported version {supported}")]
    StoreTooNew {
        /// Version recorded in the store.
        found: u32,
        /// Highest version this migrator may produce.
        supported: u32,
    },

    /// The requested target is not produced by any step.
    #[error("Unknown target schema version {target} (latest known is {latest})")]
    UnknownTarget {
        /// Requested version.
        target: u32,
        /// Highest known version.
        latest: u32,
    },

    /// The step list has a gap, a duplicate, or is not ascending.
    #[error("Migration history out of order: expected version {expected}, found {found}")]
    OutOfOrder {
        /// Version that should have come next.
        expected: u32,
        /// Version that was found instead.
        found: u32,
    },

    /// A step failed and was rolled back.
    #[error("Migration to version {version} ({description}) failed: {source}")]
    StepFailed {
        /// Version of the failed step.
        version: u32,
        /// Description of the failed step.
        description: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// The store claims a version but its tables do not have that shape.
    #[error("Schema does not match version {version}: {reason}")]
    SchemaMismatch {
        /// Version recorded in the store.
        version: u32,
        /// What is wrong with the schema.
        reason: String,
    },

    /// The recorded version could not be read or written.
    #[error("Failed to access schema version: {0}")]
    Version(#[source] rusqlite::Error),
}

/// What a migration run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Version recorded before the run.
    pub from: u32,
    /// Version recorded after the run.
    pub to: u32,
    /// Versions of the steps applied by this run, ascending.
    pub applied: Vec<u32>,
}

impl MigrationReport {
    /// Whether the run left the store untouched.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applies an ordered list of [`Migration`] steps to a store.
#[derive(Debug, Clone)]
pub struct Migrator {
    steps: Vec<Migration>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self { steps: history() }
    }
}

impl Migrator {
    /// Create a migrator over a custom step list.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::OutOfOrder`] unless the versions are exactly
    /// `1..=N` in ascending order.
    pub fn new(steps: Vec<Migration>) -> Result<Self, MigrationError> {
        Self::validate(&steps)?;
        Ok(Self { steps })
    }

    /// Check that step versions are exactly `1..=N`, ascending.
    pub fn validate(steps: &[Migration]) -> Result<(), MigrationError> {
        for (idx, step) in steps.iter().enumerate() {
            let expected = idx as u32 + 1;
            if step.version != expected {
                return Err(MigrationError::OutOfOrder {
                    expected,
                    found: step.version,
                });
            }
        }
        Ok(())
    }

    /// The steps, ascending.
    #[must_use]
    pub fn steps(&self) -> &[Migration] {
        &self.steps
    }

    /// Highest version this migrator produces.
    #[must_use]
    pub fn latest_version(&self) -> u32 {
        self.steps.last().map_or(0, |step| step.version)
    }

    /// Bring the store to [`Migrator::latest_version`].
    pub fn migrate(&self, conn: &mut Connection) -> Result<MigrationReport, MigrationError> {
        self.migrate_to(conn, self.latest_version())
    }

    /// Bring the store to `target`, applying each pending step once.
    ///
    /// # Errors
    ///
    /// See [`MigrationError`]. Steps applied before a failing step stay
    /// applied; the failing step leaves no trace.
    pub fn migrate_to(
        &self,
        conn: &mut Connection,
        target: u32,
    ) -> Result<MigrationReport, MigrationError> {
        let latest = self.latest_version();
        if target > latest {
            return Err(MigrationError::UnknownTarget { target, latest });
        }

        let from = schema_version(conn)?;
        if from > latest {
            return Err(MigrationError::StoreTooNew {
                found: from,
                supported: latest,
            });
        }
        if from > target {
            return Err(MigrationError::StoreTooNew {
                found: from,
                supported: target,
            });
        }

        let mut applied = Vec::new();
        for step in self.steps.iter().take_while(|step| step.version <= target) {
            if self.apply_step(conn, step)? {
                applied.push(step.version);
            }
        }

        let to = schema_version(conn)?;
        if applied.is_empty() {
            log::debug!("Schema already at version {}", to);
        }
        Ok(MigrationReport { from, to, applied })
    }

    /// Run one step under an exclusive lock. Returns `false` when another
    /// run already recorded it.
    fn apply_step(&self, conn: &mut Connection, step: &Migration) -> Result<bool, MigrationError> {
        let failed = |source| MigrationError::StepFailed {
            version: step.version,
            description: step.description,
            source,
        };

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)
            .map_err(failed)?;

        // Re-read under the lock: a concurrent run may have moved the version.
        let current = schema_version(&tx)?;
        if step.version <= current {
            return Ok(false);
        }
        if step.version != current + 1 {
            return Err(MigrationError::OutOfOrder {
                expected: current + 1,
                found: step.version,
            });
        }

        (step.apply)(&tx).map_err(failed)?;
        tx.pragma_update(None, "user_version", step.version)
            .map_err(failed)?;
        tx.commit().map_err(failed)?;

        log::info!(
            "Applied schema migration v{}: {}",
            step.version,
            step.description
        );
        Ok(true)
    }
}

/// Every step ever shipped, ascending.
#[must_use]
pub fn history() -> Vec<Migration> {
    vec![
        Migration::new(1, "create files table", create_files_table),
        Migration::new(2, "converge datetime lineage", converge_legacy_lineage),
        Migration::new(3, "drop redundant path index", drop_redundant_path_index),
    ]
}

/// Read the recorded schema version.
pub fn schema_version(conn: &Connection) -> Result<u32, MigrationError> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(MigrationError::Version)
}

/// Check that `files` has the canonical shape for `version`.
///
/// Catches stores whose recorded version was bumped without the schema to
/// match (hand-edited or truncated files).
pub fn verify_schema(conn: &Connection) -> Result<(), MigrationError> {
    let version = schema_version(conn)?;
    let mismatch = |reason: String| MigrationError::SchemaMismatch { version, reason };

    let columns = table_columns(conn, "files").map_err(MigrationError::Version)?;
    if columns.is_empty() {
        return Err(mismatch("table `files` is missing".to_string()));
    }

    let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
    if names != FILES_COLUMNS {
        return Err(mismatch(format!(
            "table `files` has columns {:?}, expected {:?}",
            names, FILES_COLUMNS
        )));
    }
    if !columns.iter().any(|(name, pk)| name == "path" && *pk) {
        return Err(mismatch("`path` is not the primary key".to_string()));
    }
    Ok(())
}

/// v1: canonical table plus the explicit index later found redundant.
fn create_files_table(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(FILES_TABLE_SQL)?;
    tx.execute_batch("CREATE INDEX IF NOT EXISTS files_path_idx ON files (path)")
}

/// v2: rebuild a `datetime`-lineage table in the canonical shape.
fn converge_legacy_lineage(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if !column_exists(tx, "files", "datetime")? {
        return Ok(());
    }

    let legacy_rows: i64 = tx.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
    tx.execute_batch("ALTER TABLE files RENAME TO files_legacy")?;
    tx.execute_batch(FILES_TABLE_SQL)?;
    let carried = tx.execute(LEGACY_COPY_SQL, [])?;
    tx.execute_batch("DROP TABLE files_legacy")?;

    let dropped = legacy_rows - carried as i64;
    if dropped > 0 {
        log::warn!(
            "Dropped {} legacy cache rows that could not be converted; they will be rehashed",
            dropped
        );
    }
    log::debug!("Converted {} legacy cache rows", carried);
    Ok(())
}

/// v3: drop user-created indexes covering only `files(path)`.
fn drop_redundant_path_index(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let explicit: Vec<String> = {
        let mut stmt = tx.prepare("SELECT name FROM pragma_index_list('files') WHERE origin = 'c'")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        names.collect::<rusqlite::Result<_>>()?
    };

    for name in explicit {
        let columns: Vec<String> = {
            let mut stmt = tx.prepare("SELECT name FROM pragma_index_info(?1)")?;
            let cols = stmt.query_map([&name], |row| row.get::<_, String>(0))?;
            cols.collect::<rusqlite::Result<_>>()?
        };
        if columns == ["path"] {
            tx.execute_batch(&format!("DROP INDEX \"{}\"", name.replace('"', "\"\"")))?;
            log::debug!("Dropped redundant index {}", name);
        }
    }
    Ok(())
}

/// `(name, is_primary_key)` for each column of `table`, in order.
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<(String, bool)>> {
    let mut stmt = conn.prepare("SELECT name, pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map([table], |row| {
        let name: String = row.get(0)?;
        let pk: i64 = row.get(1)?;
        Ok((name, pk > 0))
    })?;
    rows.collect()
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    Ok(table_columns(conn, table)?
        .iter()
        .any(|(name, _)| name == column))
}
