//! SQLite-backed scratch store for the records resolution needs.
//!
//! The cache is a single ordered `key -> value` table. It is populated once,
//! in batched transactions, by the cache-population pass and then read
//! concurrently by the resolution workers, each through its own read-only
//! connection. The database is scratch space rebuilt on every run, so
//! journalling and synchronous writes are disabled.

pub mod codec;

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use rusqlite::{Connection, Error as SqliteError, OpenFlags, OptionalExtension};
use thiserror::Error;

pub use codec::{CacheKey, CodecError};

/// File name of the cache database inside the cache directory.
pub const CACHE_FILE_NAME: &str = "denorm-cache.sqlite3";

const SIDE_FILE_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

/// Errors raised by the cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache directory could not be created.
    #[error("failed to create cache directory {path}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A stale cache database could not be removed.
    #[error("failed to clear cache database {path}")]
    Clear {
        /// File that could not be removed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Opening a connection failed.
    #[error("failed to open cache database at {path}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Applying connection pragmas failed.
    #[error("failed to configure cache connection")]
    Configure {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Creating the `cache` table failed.
    #[error("failed to create cache table")]
    CreateSchema {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Writing a batch failed.
    #[error("failed to write a batch of {records} cache records")]
    WriteBatch {
        /// Number of records in the failed batch.
        records: usize,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Reading a record failed.
    #[error("failed to read cache record {key}")]
    Read {
        /// Key being read.
        key: CacheKey,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
}

/// Handle on the cache database of one run.
#[derive(Debug, Clone)]
pub struct DenormCache {
    path: Utf8PathBuf,
}

impl DenormCache {
    /// Open the cache under `dir`, creating the directory and schema.
    ///
    /// With `clear` set, any database left over from an earlier run is
    /// deleted first.
    pub fn open(dir: &Utf8Path, clear: bool) -> Result<Self, CacheError> {
        denorm_fs::ensure_dir(dir).map_err(|source| CacheError::CreateDirectory {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(CACHE_FILE_NAME);
        if clear {
            clear_database(&path)?;
        }

        let connection = open_connection(&path, OpenFlags::default())?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS cache (
                    key BLOB PRIMARY KEY,
                    value BLOB NOT NULL
                ) WITHOUT ROWID",
                [],
            )
            .map_err(|source| CacheError::CreateSchema { source })?;
        debug!("opened cache database at {path}");
        Ok(Self { path })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Open the batching writer used by the population pass.
    pub fn writer(&self, batch_size: usize) -> Result<CacheWriter, CacheError> {
        let connection = open_connection(&self.path, OpenFlags::default())?;
        connection
            .pragma_update_and_check(None, "journal_mode", "OFF", |row| row.get::<_, String>(0))
            .map_err(|source| CacheError::Configure { source })?;
        connection
            .pragma_update(None, "synchronous", "OFF")
            .map_err(|source| CacheError::Configure { source })?;
        Ok(CacheWriter {
            connection,
            pending: Vec::new(),
            batch_size,
            written: 0,
            batches: 0,
        })
    }

    /// Open an independent read-only connection.
    pub fn reader(&self) -> Result<CacheReader, CacheError> {
        let connection = open_connection(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(CacheReader { connection })
    }
}

fn open_connection(path: &Utf8Path, flags: OpenFlags) -> Result<Connection, CacheError> {
    Connection::open_with_flags(path.as_std_path(), flags).map_err(|source| CacheError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn clear_database(path: &Utf8Path) -> Result<(), CacheError> {
    let side_files = SIDE_FILE_SUFFIXES
        .iter()
        .map(|suffix| Utf8PathBuf::from(format!("{path}{suffix}")));
    for file in std::iter::once(path.to_path_buf()).chain(side_files) {
        let removed = denorm_fs::remove_file_if_exists(&file).map_err(|source| CacheError::Clear {
            path: file.clone(),
            source,
        })?;
        if removed {
            debug!("removed stale cache file {file}");
        }
    }
    Ok(())
}

/// Buffers `put` calls and commits them in batched transactions.
///
/// Buffered records are only durable after [`CacheWriter::flush`] or
/// [`CacheWriter::finish`]; dropping a writer discards them.
#[derive(Debug)]
pub struct CacheWriter {
    connection: Connection,
    pending: Vec<(CacheKey, Vec<u8>)>,
    batch_size: usize,
    written: u64,
    batches: u64,
}

impl CacheWriter {
    /// Buffer one record, committing the batch once it exceeds the threshold.
    pub fn put(&mut self, key: CacheKey, value: Vec<u8>) -> Result<(), CacheError> {
        self.pending.push((key, value));
        if self.pending.len() > self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit every buffered record in one transaction.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let records = self.pending.len();
        let write_error = |source: SqliteError| CacheError::WriteBatch { records, source };

        let transaction = self.connection.transaction().map_err(write_error)?;
        {
            let mut statement = transaction
                .prepare_cached("INSERT OR REPLACE INTO cache (key, value) VALUES (?1, ?2)")
                .map_err(write_error)?;
            for (key, value) in &self.pending {
                statement
                    .execute((key.as_bytes(), value.as_slice()))
                    .map_err(write_error)?;
            }
        }
        transaction.commit().map_err(write_error)?;

        self.pending.clear();
        self.written += records as u64;
        self.batches += 1;
        debug!("flushed {records} cache records (batch {})", self.batches);
        Ok(())
    }

    /// Records buffered but not yet committed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Records committed so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Flush the remaining records and return the total committed.
    pub fn finish(mut self) -> Result<u64, CacheError> {
        self.flush()?;
        Ok(self.written)
    }
}

/// Read-only point lookups into the cache.
#[derive(Debug)]
pub struct CacheReader {
    connection: Connection,
}

impl CacheReader {
    /// Fetch the value stored under `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let read_error = |source: SqliteError| CacheError::Read {
            key: key.clone(),
            source,
        };
        let mut statement = self
            .connection
            .prepare_cached("SELECT value FROM cache WHERE key = ?1")
            .map_err(read_error)?;
        statement
            .query_row([key.as_bytes()], |row| row.get::<_, Vec<u8>>(0))
            .optional()
            .map_err(read_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn cache_dir(temp_dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp_dir.path().join("nested/cache")).expect("utf-8 path")
    }

    fn count_rows(cache: &DenormCache) -> i64 {
        let connection = Connection::open(cache.path().as_std_path()).expect("open database");
        connection
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))
            .expect("count rows")
    }

    #[rstest]
    fn open_creates_directory_and_schema(temp_dir: TempDir) {
        let dir = cache_dir(&temp_dir);
        let cache = DenormCache::open(&dir, true).expect("open cache");
        assert!(cache.path().starts_with(&dir));
        assert!(cache.path().as_std_path().exists());
        assert_eq!(count_rows(&cache), 0);
    }

    #[rstest]
    fn writes_are_batched_until_threshold_exceeded(temp_dir: TempDir) {
        let cache = DenormCache::open(&cache_dir(&temp_dir), true).expect("open cache");
        let mut writer = cache.writer(2).expect("open writer");

        writer.put(CacheKey::node(1), vec![1]).expect("put");
        writer.put(CacheKey::node(2), vec![2]).expect("put");
        assert_eq!(writer.pending(), 2);
        assert_eq!(count_rows(&cache), 0);

        writer.put(CacheKey::node(3), vec![3]).expect("put");
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.written(), 3);
        assert_eq!(count_rows(&cache), 3);

        writer.put(CacheKey::way(1), vec![4]).expect("put");
        assert_eq!(writer.finish().expect("final flush"), 4);
        assert_eq!(count_rows(&cache), 4);
    }

    #[rstest]
    fn reader_sees_flushed_records(temp_dir: TempDir) {
        let cache = DenormCache::open(&cache_dir(&temp_dir), true).expect("open cache");
        let mut writer = cache.writer(100).expect("open writer");
        writer.put(CacheKey::node(7), vec![7, 7]).expect("put");
        writer.put(CacheKey::way(7), vec![8]).expect("put");
        writer.finish().expect("flush");

        let reader = cache.reader().expect("open reader");
        assert_eq!(
            reader.get(&CacheKey::node(7)).expect("get"),
            Some(vec![7, 7])
        );
        assert_eq!(reader.get(&CacheKey::way(7)).expect("get"), Some(vec![8]));
        assert_eq!(reader.get(&CacheKey::relation(7)).expect("get"), None);
    }

    #[rstest]
    #[case(true, 0)]
    #[case(false, 1)]
    fn reopening_honours_clear_flag(temp_dir: TempDir, #[case] clear: bool, #[case] rows: i64) {
        let dir = cache_dir(&temp_dir);
        let cache = DenormCache::open(&dir, true).expect("open cache");
        let mut writer = cache.writer(10).expect("open writer");
        writer.put(CacheKey::node(1), vec![1]).expect("put");
        writer.finish().expect("flush");

        let reopened = DenormCache::open(&dir, clear).expect("reopen cache");
        assert_eq!(count_rows(&reopened), rows);
    }

    #[rstest]
    fn later_puts_replace_earlier_values(temp_dir: TempDir) {
        let cache = DenormCache::open(&cache_dir(&temp_dir), true).expect("open cache");
        let mut writer = cache.writer(10).expect("open writer");
        writer.put(CacheKey::node(1), vec![1]).expect("put");
        writer.flush().expect("flush");
        writer.put(CacheKey::node(1), vec![2]).expect("put");
        writer.finish().expect("flush");

        let reader = cache.reader().expect("open reader");
        assert_eq!(reader.get(&CacheKey::node(1)).expect("get"), Some(vec![2]));
    }
}
