// ABOUTME: SQLite connection handling for delta sync backends
// ABOUTME: Opens database files with a busy timeout and converts timestamps to sortable text

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// An open SQLite database shared by the methods of one backend value.
///
/// The connection lives behind a mutex so backends can be `Sync`; no lock is
/// ever held across an `.await`.
pub struct SqliteHandle {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteHandle {
    /// Open (or create) the database file at `path`.
    ///
    /// `busy_timeout` bounds how long a statement waits on a locked database.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let endpoint = format!("sqlite:{}", path.display());
        let conn = Connection::open(path).map_err(|e| SyncError::connection(&endpoint, e))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| SyncError::connection(&endpoint, e))?;
        tracing::debug!("Opened SQLite database {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection for the duration of a synchronous block.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            SyncError::connection(
                format!("sqlite:{}", self.path.display()),
                "connection mutex poisoned by a panicked statement",
            )
        })
    }
}

/// Format a timestamp as fixed-width RFC 3339 UTC text (`2024-03-01T10:00:00.000000Z`).
///
/// Every value has the same width, so SQLite text comparison orders them in time.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_timestamp`] (any RFC 3339 offset is accepted).
pub fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|ts| ts.with_timezone(&Utc))
}

/// Read a timestamp column stored as RFC 3339 text.
pub fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        parse_timestamp(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}
