use crate::record::MetricRecord;
use rusqlite::{Connection, ToSql};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Target table for parsed metrics.
pub const TABLE: &str = "services";

const COLUMNS: &str = "timestamp, container_id, container_name, cpu_percentage, \
                       memory_usage_mib, memory_limit_mib, memory_percentage";

/// Bound parameters per row.
pub const PARAMS_PER_ROW: usize = 7;

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` for the bundled library.
pub const MAX_BOUND_PARAMS: usize = 32_766;

/// Destination for batches of parsed records.
///
/// Implementations must accept concurrent calls from several file workers
/// without interleaving rows of different batches.
pub trait MetricsSink: Send + Sync {
    fn insert_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError>;
}

#[derive(Debug)]
pub enum StorageError {
    /// Opening the database or preparing the schema failed.
    Connection {
        path: PathBuf,
        source: rusqlite::Error,
    },
    /// A batch insert failed; none of its rows were written.
    Insert {
        rows: usize,
        source: rusqlite::Error,
    },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Connection { path, source } => {
                write!(f, "failed to open database {}: {}", path.display(), source)
            }
            StorageError::Insert { rows, source } => {
                write!(f, "failed to insert batch of {rows} rows: {source}")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Connection { source, .. } => Some(source),
            StorageError::Insert { source, .. } => Some(source),
        }
    }
}

/// Opens (or creates) the metrics database at the given path.
///
/// Creates the services table if it doesn't already exist. `busy_timeout`
/// bounds how long a statement waits on a database locked by another
/// process before failing.
pub fn open_or_create(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;

    // Enable WAL mode so readers don't block the loader
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.busy_timeout(busy_timeout)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS services (
            timestamp          TEXT NOT NULL,
            container_id       TEXT NOT NULL,
            container_name     TEXT NOT NULL,
            cpu_percentage     REAL NOT NULL,
            memory_usage_mib   REAL NOT NULL,
            memory_limit_mib   REAL NOT NULL,
            memory_percentage  REAL NOT NULL
        );",
    )?;

    Ok(conn)
}

/// Build `INSERT INTO services (...) VALUES (?, ...), (?, ...)` for `rows` records.
fn insert_sql(rows: usize) -> String {
    let group = format!("({})", vec!["?"; PARAMS_PER_ROW].join(", "));
    let values = vec![group.as_str(); rows].join(", ");
    format!("INSERT INTO {TABLE} ({COLUMNS}) VALUES {values}")
}

/// Insert all records as one multi-row statement with positional parameters.
pub fn insert_metrics(conn: &Connection, records: &[MetricRecord]) -> rusqlite::Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(records.len() * PARAMS_PER_ROW);
    for r in records {
        params.extend_from_slice(&[
            &r.timestamp,
            &r.container_id,
            &r.container_name,
            &r.cpu_percentage,
            &r.memory_usage_mib,
            &r.memory_limit_mib,
            &r.memory_percentage,
        ]);
    }

    let mut stmt = conn.prepare(&insert_sql(records.len()))?;
    stmt.execute(params.as_slice())
}

/// Number of rows currently in the services table.
pub fn count_metrics(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM services", [], |row| row.get(0))
}

/// SQLite-backed sink sharing one connection between workers.
///
/// Each batch holds the connection lock for its single statement, so
/// concurrent batches are serialized rather than interleaved.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        let conn = open_or_create(path, busy_timeout).map_err(|source| {
            StorageError::Connection {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A panicking worker can't leave the connection half-written: every
        // batch is a single statement.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn row_count(&self) -> rusqlite::Result<i64> {
        count_metrics(&self.lock())
    }
}

impl MetricsSink for SqliteSink {
    fn insert_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError> {
        let conn = self.lock();
        insert_metrics(&conn, records).map_err(|source| StorageError::Insert {
            rows: records.len(),
            source,
        })?;
        Ok(())
    }
}
