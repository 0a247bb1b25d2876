//! SQLite-backed file-state store.

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use super::migrations::{self, MigrationError, MigrationReport, Migrator, LATEST_VERSION};
use super::record::{Checksum, FileRecord, Observation, Status};

/// Errors raised by [`FileStateCache`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The store file could not be opened or created.
    #[error("Cache store unavailable at {path}: {source}")]
    StoreUnavailable {
        /// Location of the store.
        path: PathBuf,
        /// Underlying I/O or SQLite error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The store cannot be brought to (or is not at) the current schema.
    #[error("Cache schema migration failed: {0}")]
    Migration(#[from] MigrationError),

    /// A stored row violates the record invariants.
    #[error("Corrupt cache record for {path}: {reason}")]
    RecordCorrupt {
        /// Key of the offending row.
        path: String,
        /// Which invariant is broken.
        reason: String,
    },

    /// A stored key is not UTF-8 text, so no walked file can ever match it.
    /// `key` is a lossy rendering for display only.
    #[error("Corrupt cache key {key}: {reason}")]
    KeyCorrupt {
        /// Printable form of the stored key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A confirm was given values the store cannot hold.
    #[error("Rejected cache record for {path}: {reason}")]
    Rejected {
        /// Key of the rejected record.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Any other storage failure.
    #[error("Cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A thread panicked while holding the connection.
    #[error("Cache connection lock poisoned")]
    LockPoisoned,
}

impl CacheError {
    /// Whether this error concerns a single row and can be recovered from by
    /// re-observing that path.
    #[must_use]
    pub fn is_record_corrupt(&self) -> bool {
        matches!(
            self,
            CacheError::RecordCorrupt { .. } | CacheError::KeyCorrupt { .. }
        )
    }
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Connection settings for [`FileStateCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// How long to wait on another connection's lock before failing.
    pub busy_timeout: Duration,
    /// Rows fetched per page by [`FileStateCache::scan_all`].
    pub scan_page_size: usize,
    /// Open without migrating or writing (status readers).
    pub read_only: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            scan_page_size: 512,
            read_only: false,
        }
    }
}

/// Persistent change-detection cache.
///
/// Holds one SQLite connection behind a mutex so a single instance can be
/// shared across hashing threads through `Arc`. Every mutating call is one
/// statement and therefore atomic on its own.
pub struct FileStateCache {
    conn: Mutex<Connection>,
    location: PathBuf,
    scan_page_size: usize,
    read_only: bool,
}

impl fmt::Debug for FileStateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStateCache")
            .field("location", &self.location)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl FileStateCache {
    /// Open or create the store at `path` and migrate it to the latest
    /// schema.
    pub fn open(path: &Path) -> CacheResult<Self> {
        Self::open_with(path, &CacheOptions::default())
    }

    /// Open the store at `path` with explicit options.
    ///
    /// # Errors
    ///
    /// [`CacheError::StoreUnavailable`] when the file cannot be opened or is
    /// not a SQLite database, [`CacheError::Migration`] when its schema
    /// cannot be brought to the latest version (or, read-only, is not
    /// already there).
    pub fn open_with(path: &Path, options: &CacheOptions) -> CacheResult<Self> {
        let unavailable = |source: Box<dyn std::error::Error + Send + Sync>| {
            CacheError::StoreUnavailable {
                path: path.to_path_buf(),
                source,
            }
        };

        if !options.read_only {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| unavailable(Box::new(e)))?;
            }
        }

        let flags = if options.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        };
        let conn = Connection::open_with_flags(path, flags).map_err(|e| unavailable(Box::new(e)))?;
        configure(&conn, options).map_err(|e| unavailable(Box::new(e)))?;

        log::debug!("Opened cache store at {}", path.display());
        Self::finish_open(conn, path.to_path_buf(), options)
    }

    /// Open a private in-memory store, migrated to the latest schema.
    pub fn open_in_memory() -> CacheResult<Self> {
        let location = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| CacheError::StoreUnavailable {
            path: location.clone(),
            source: Box::new(e),
        })?;
        Self::finish_open(conn, location, &CacheOptions::default())
    }

    /// Open an existing store for reading alongside an active writer.
    pub fn open_read_only(path: &Path) -> CacheResult<Self> {
        let options = CacheOptions {
            read_only: true,
            ..CacheOptions::default()
        };
        Self::open_with(path, &options)
    }

    fn finish_open(mut conn: Connection, location: PathBuf, options: &CacheOptions) -> CacheResult<Self> {
        if options.read_only {
            let found = migrations::schema_version(&conn)?;
            if found != LATEST_VERSION {
                return Err(if found > LATEST_VERSION {
                    MigrationError::StoreTooNew {
                        found,
                        supported: LATEST_VERSION,
                    }
                } else {
                    MigrationError::SchemaMismatch {
                        version: found,
                        reason: format!(
                            "read-only store needs migration to version {}",
                            LATEST_VERSION
                        ),
                    }
                }
                .into());
            }
        } else {
            let report = Migrator::default().migrate(&mut conn)?;
            if !report.is_noop() {
                log::info!(
                    "Migrated cache store {} from v{} to v{}",
                    location.display(),
                    report.from,
                    report.to
                );
            }
        }
        migrations::verify_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            location,
            scan_page_size: options.scan_page_size.max(1),
            read_only: options.read_only,
        })
    }

    fn conn(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Where the store lives (`:memory:` for in-memory stores).
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Re-run the migrator. A no-op on a store opened by this type, which is
    /// already at the latest version.
    pub fn migrate(&self) -> CacheResult<MigrationReport> {
        let mut conn = self.conn()?;
        Ok(Migrator::default().migrate(&mut conn)?)
    }

    /// Schema version recorded in the store.
    pub fn schema_version(&self) -> CacheResult<u32> {
        let conn = self.conn()?;
        Ok(migrations::schema_version(&conn)?)
    }

    /// Stored record for `path`, if it was ever confirmed.
    pub fn lookup(&self, path: &str) -> CacheResult<Option<FileRecord>> {
        let raw = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare_cached(
                "SELECT path, modified_since_epoch_sec, size, checksum
                 FROM files WHERE path = ?1",
            )?;
            stmt.query_row(params![path], RawRow::from_row).optional()?
        };
        log::trace!("Cache lookup {}: {}", path, if raw.is_some() { "hit" } else { "miss" });
        raw.map(RawRow::into_record).transpose()
    }

    /// Compare a fresh observation against the stored record.
    ///
    /// `Unchanged` means mtime and size are identical and the stored
    /// checksum may be reused without reading the file. A file rewritten
    /// with the same size inside one timestamp tick also lands here; callers
    /// that cannot accept that must hash and [`confirm`](Self::confirm)
    /// regardless.
    pub fn classify(&self, path: &str, observed: &Observation) -> CacheResult<Status> {
        let status = match self.lookup(path)? {
            None => Status::New,
            Some(record) if record.matches(observed) => Status::Unchanged,
            Some(_) => Status::PossiblyChanged,
        };
        log::trace!("Classified {}: {}", path, status);
        Ok(status)
    }

    /// Insert or replace the record for `path` with a complete observation.
    ///
    /// On failure the previous record, if any, is left as it was.
    pub fn confirm(&self, path: &str, observed: &Observation, checksum: &Checksum) -> CacheResult<()> {
        let rejected = |reason: String| CacheError::Rejected {
            path: path.to_string(),
            reason,
        };
        if !observed.modified_since_epoch_sec.is_finite() {
            return Err(rejected(format!(
                "modification time {} is not finite",
                observed.modified_since_epoch_sec
            )));
        }
        let size = i64::try_from(observed.size)
            .map_err(|_| rejected(format!("size {} does not fit the store", observed.size)))?;
        if checksum.is_empty() {
            return Err(rejected("checksum is empty".to_string()));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO files (path, modified_since_epoch_sec, size, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (path) DO UPDATE SET
                 modified_since_epoch_sec = excluded.modified_since_epoch_sec,
                 size = excluded.size,
                 checksum = excluded.checksum",
        )?;
        stmt.execute(params![path, observed.modified_since_epoch_sec, size, checksum])?;
        log::trace!("Confirmed {} ({} bytes, {})", path, observed.size, checksum);
        Ok(())
    }

    /// Delete the record for `path`. Returns whether one existed.
    pub fn remove(&self, path: &str) -> CacheResult<bool> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("DELETE FROM files WHERE path = ?1")?;
        let removed = stmt.execute(params![path])? > 0;
        log::trace!("Removed {}: {}", path, removed);
        Ok(removed)
    }

    /// Delete every row whose key is a blob or text that is not UTF-8.
    /// These are the rows [`scan_all`](Self::scan_all) reports as
    /// [`CacheError::KeyCorrupt`]; they cannot be removed by key.
    pub fn remove_invalid_keys(&self) -> CacheResult<usize> {
        let conn = self.conn()?;
        let mut invalid = Vec::new();
        {
            let mut stmt = conn.prepare("SELECT rowid, path FROM files")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let valid = match row.get_ref(1)? {
                    ValueRef::Text(bytes) => std::str::from_utf8(bytes).is_ok(),
                    _ => false,
                };
                if !valid {
                    invalid.push(row.get::<_, i64>(0)?);
                }
            }
        }
        let mut stmt = conn.prepare_cached("DELETE FROM files WHERE rowid = ?1")?;
        for rowid in &invalid {
            stmt.execute(params![rowid])?;
        }
        log::debug!("Removed {} rows with invalid keys", invalid.len());
        Ok(invalid.len())
    }

    /// Whether a record for `path` has this size and checksum, regardless of
    /// mtime. Tells a metadata-only touch apart from a content change.
    pub fn matches_checksum(&self, path: &str, size: u64, checksum: &Checksum) -> CacheResult<bool> {
        let Ok(size) = i64::try_from(size) else {
            return Ok(false);
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT 1 FROM files WHERE path = ?1 AND size = ?2 AND checksum = ?3",
        )?;
        Ok(stmt.exists(params![path, size, checksum])?)
    }

    /// Every stored record in ascending path order.
    ///
    /// Rows are fetched lazily, one page at a time; the connection is only
    /// locked while a page is read, so writes may interleave with the
    /// iteration. Each call starts over from the first path.
    pub fn scan_all(&self) -> Records<'_> {
        Records {
            cache: self,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> CacheResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete every record. Returns how many were removed.
    pub fn clear(&self) -> CacheResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM files", [])?;
        log::debug!("Cleared {} cache records", removed);
        Ok(removed)
    }

    /// Checkpoint the write-ahead log and close the connection.
    ///
    /// Dropping the cache also closes it, but swallows errors.
    pub fn close(self) -> CacheResult<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| CacheError::LockPoisoned)?;
        if !self.read_only {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
        }
        conn.close().map_err(|(_, e)| CacheError::Sqlite(e))?;
        log::debug!("Closed cache store at {}", self.location.display());
        Ok(())
    }

    fn fetch_page(&self, after: Option<&RawKey>) -> CacheResult<Vec<RawRow>> {
        let conn = self.conn()?;
        let limit = self.scan_page_size as i64;
        // Keys compare by type then bytes, so the cursor is bound with the
        // stored type. Text goes in as a blob and is cast back, which keeps
        // bytes that are not UTF-8.
        let rows = match after {
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT path, modified_since_epoch_sec, size, checksum
                     FROM files ORDER BY path LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], RawRow::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some(RawKey::Text(bytes)) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT path, modified_since_epoch_sec, size, checksum
                     FROM files WHERE path > CAST(?1 AS TEXT) ORDER BY path LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![bytes, limit], RawRow::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some(RawKey::Other(value)) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT path, modified_since_epoch_sec, size, checksum
                     FROM files WHERE path > ?1 ORDER BY path LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![value, limit], RawRow::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }
}

/// Apply connection pragmas. Errors here are how a non-database file shows
/// itself, so the caller reports them as an unavailable store.
fn configure(conn: &Connection, options: &CacheOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    if options.read_only {
        conn.execute_batch("PRAGMA query_only = ON;")?;
    } else {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
    }
    // Touch the schema so garbage files fail here rather than mid-scan.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

/// Lazy, path-ordered iterator over stored records.
///
/// Corrupt rows come out as [`CacheError::RecordCorrupt`] (or
/// [`CacheError::KeyCorrupt`] when the key itself is unusable) and iteration
/// continues past them. A storage error ends the iteration after it is
/// yielded.
pub struct Records<'a> {
    cache: &'a FileStateCache,
    after: Option<RawKey>,
    buffer: VecDeque<CacheResult<FileRecord>>,
    exhausted: bool,
}

impl Iterator for Records<'_> {
    type Item = CacheResult<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.cache.fetch_page(self.after.as_ref()) {
                Ok(rows) => {
                    if rows.len() < self.cache.scan_page_size {
                        self.exhausted = true;
                    }
                    if let Some(last) = rows.last() {
                        self.after = Some(last.path.clone());
                    }
                    self.buffer
                        .extend(rows.into_iter().map(RawRow::into_record));
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front()
    }
}

/// A key as stored. Text keeps its raw bytes so a key that is not UTF-8
/// can still serve as the page cursor.
#[derive(Debug, Clone)]
enum RawKey {
    Text(Vec<u8>),
    Other(Value),
}

impl RawKey {
    fn from_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Text(bytes) => RawKey::Text(bytes.to_vec()),
            other => RawKey::Other(owned(other)),
        }
    }

    /// The key as a `String`, or why it cannot be one.
    fn to_key(&self) -> Result<String, CacheError> {
        let (key, reason) = match self {
            RawKey::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(key) => return Ok(key.to_string()),
                Err(e) => (
                    String::from_utf8_lossy(bytes).into_owned(),
                    format!("key is not valid UTF-8 ({})", e),
                ),
            },
            RawKey::Other(Value::Blob(bytes)) => (
                format!("x'{}'", bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>()),
                "key is a blob".to_string(),
            ),
            RawKey::Other(other) => (describe(other), format!("key is {}", describe(other))),
        };
        Err(CacheError::KeyCorrupt { key, reason })
    }
}

/// A row as stored, before the invariants are checked.
struct RawRow {
    path: RawKey,
    modified: Value,
    size: Value,
    checksum: Value,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            path: RawKey::from_ref(row.get_ref(0)?),
            modified: owned(row.get_ref(1)?),
            size: owned(row.get_ref(2)?),
            checksum: owned(row.get_ref(3)?),
        })
    }

    fn into_record(self) -> CacheResult<FileRecord> {
        let path = self.path.to_key()?;
        let corrupt = |reason: String| CacheError::RecordCorrupt {
            path: path.clone(),
            reason,
        };

        let modified_since_epoch_sec = match &self.modified {
            Value::Real(v) if v.is_finite() => *v,
            Value::Integer(v) => *v as f64,
            other => return Err(corrupt(format!("modification time is {}", describe(other)))),
        };
        let size = match &self.size {
            Value::Integer(v) if *v >= 0 => *v as u64,
            other => return Err(corrupt(format!("size is {}", describe(other)))),
        };
        let checksum = match &self.checksum {
            Value::Blob(bytes) if !bytes.is_empty() => Checksum::new(bytes.clone()),
            other => return Err(corrupt(format!("checksum is {}", describe(other)))),
        };

        Ok(FileRecord {
            path,
            modified_since_epoch_sec,
            size,
            checksum,
        })
    }
}

/// Owned copy of a cell. Text that is not UTF-8 is replaced lossily
/// instead of failing the row.
fn owned(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => format!("integer {}", v),
        Value::Real(v) => format!("real {}", v),
        Value::Text(t) => format!("text {:?}", t),
        Value::Blob(b) if b.is_empty() => "an empty blob".to_string(),
        Value::Blob(b) => format!("a {}-byte blob", b.len()),
    }
}
