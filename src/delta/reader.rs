// ABOUTME: Extractor for delta sync - reads changed customer rows from the source
// ABOUTME: Selects rows strictly newer than the watermark and reports the highest timestamp seen

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Row};

use super::record::{ChangeRecord, ExtractedBatch};
use super::schema::Dialect;
use crate::error::{Result, SyncError};
use crate::sqlite::{format_timestamp, timestamp_column, SqliteHandle};

/// Read-only query interface to the source store.
///
/// Implementations run one query bound to a single timestamp parameter and
/// return `(customer_id, status, substatus, note, updated_at)` rows in any order.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Rows whose change timestamp is strictly greater than `since`.
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeRecord>>;
}

/// Reads a delta from a [`ChangeSource`] and computes its high-water mark.
pub struct Extractor<'a> {
    source: &'a dyn ChangeSource,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a dyn ChangeSource) -> Self {
        Self { source }
    }

    /// Extract every source row changed after `since`.
    ///
    /// Any failure is returned as-is; a partial result is never produced.
    pub async fn extract(&self, since: DateTime<Utc>) -> Result<ExtractedBatch> {
        let records = self.source.fetch_since(since).await?;
        let batch = ExtractedBatch::new(since, records);

        match batch.max_ts {
            Some(max_ts) => tracing::info!(
                "Extracted {} changed rows since {} (max updated_at {})",
                batch.len(),
                since,
                max_ts
            ),
            None => tracing::debug!("No source rows changed since {}", since),
        }

        Ok(batch)
    }
}

/// PostgreSQL source running a parameterized delta query.
pub struct PostgresSource {
    client: Client,
    query: String,
}

impl PostgresSource {
    /// `query` must bind the watermark as `$1`; `None` uses the default query.
    pub fn new(client: Client, query: Option<String>) -> Self {
        Self {
            client,
            query: query.unwrap_or_else(|| Dialect::Postgres.default_source_query()),
        }
    }
}

#[async_trait]
impl ChangeSource for PostgresSource {
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeRecord>> {
        let stmt = self
            .client
            .prepare(&self.query)
            .await
            .map_err(|e| SyncError::from_postgres("Failed to prepare source delta query", e))?;

        let since_naive = since.naive_utc();
        let param = watermark_param(stmt.params().first(), &since, &since_naive);
        let rows = self
            .client
            .query(&stmt, &[param])
            .await
            .map_err(|e| SyncError::from_postgres("Failed to run source delta query", e))?;

        rows.iter().map(pg_row_to_record).collect()
    }
}

/// Bind the watermark in the shape the query expects.
///
/// A `timestamp without time zone` column makes the server infer `$1` as
/// `timestamp`, which refuses a `DateTime<Utc>`; it gets the naive UTC value.
fn watermark_param<'a>(
    param_type: Option<&Type>,
    since: &'a DateTime<Utc>,
    since_naive: &'a NaiveDateTime,
) -> &'a (dyn ToSql + Sync) {
    match param_type {
        Some(ty) if *ty == Type::TIMESTAMP => since_naive as &(dyn ToSql + Sync),
        _ => since as &(dyn ToSql + Sync),
    }
}

/// Convert a source row, tolerating the integer and timestamp widths sources commonly use.
fn pg_row_to_record(row: &Row) -> Result<ChangeRecord> {
    let customer_id = match row.try_get::<_, i32>(0) {
        Ok(id) => id,
        Err(_) => {
            let wide: i64 = row
                .try_get(0)
                .map_err(|e| SyncError::query("Source row has no integer customer id", e))?;
            i32::try_from(wide).map_err(|e| {
                SyncError::query(format!("Customer id {} does not fit INTEGER", wide), e)
            })?
        }
    };

    let updated_at = match row.try_get::<_, Option<DateTime<Utc>>>(4) {
        Ok(ts) => ts,
        // timestamp without time zone is taken as UTC
        Err(_) => row
            .try_get::<_, Option<NaiveDateTime>>(4)
            .map_err(|e| SyncError::query("Source row has no change timestamp column", e))?
            .map(|naive| naive.and_utc()),
    };
    let updated_at = updated_at.ok_or_else(|| {
        SyncError::query(
            format!("Source row for customer {} has NULL updated_at", customer_id),
            "change timestamp must not be NULL",
        )
    })?;

    let text = |idx: usize| -> Result<Option<String>> {
        row.try_get(idx)
            .map_err(|e| SyncError::query(format!("Source column {} is not text", idx), e))
    };

    Ok(ChangeRecord {
        customer_id,
        status: text(1)?,
        substatus: text(2)?,
        note: text(3)?,
        updated_at,
    })
}

/// SQLite source running a parameterized delta query.
///
/// The query compares change timestamps as text against the fixed-width form
/// written by [`format_timestamp`]. Rows stored in another RFC 3339 shape (for
/// example `2024-03-01T10:00:00Z`) can pass that comparison without being newer,
/// so every parsed row is checked against the watermark again.
pub struct SqliteSource {
    handle: SqliteHandle,
    query: String,
}

impl SqliteSource {
    /// `query` must bind the watermark as `?1`; `None` uses the default query.
    pub fn new(handle: SqliteHandle, query: Option<String>) -> Self {
        Self {
            handle,
            query: query.unwrap_or_else(|| Dialect::Sqlite.default_source_query()),
        }
    }
}

#[async_trait]
impl ChangeSource for SqliteSource {
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeRecord>> {
        let conn = self.handle.lock()?;
        let mut stmt = conn
            .prepare(&self.query)
            .map_err(|e| SyncError::query("Failed to prepare source delta query", e))?;

        let rows = stmt
            .query_map([format_timestamp(&since)], |row| {
                let customer_id: i64 = row.get(0)?;
                let updated_at = timestamp_column(row, 4)?;
                Ok((
                    customer_id,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    updated_at,
                ))
            })
            .map_err(|e| SyncError::query("Failed to run source delta query", e))?;

        let mut records = Vec::new();
        let mut not_newer = 0usize;
        for row in rows {
            let (customer_id, status, substatus, note, updated_at) =
                row.map_err(|e| SyncError::query("Failed to read source row", e))?;
            let customer_id = i32::try_from(customer_id).map_err(|e| {
                SyncError::query(format!("Customer id {} does not fit INTEGER", customer_id), e)
            })?;
            let updated_at = updated_at.ok_or_else(|| {
                SyncError::query(
                    format!("Source row for customer {} has NULL updated_at", customer_id),
                    "change timestamp must not be NULL",
                )
            })?;
            if updated_at <= since {
                not_newer += 1;
                continue;
            }
            records.push(ChangeRecord {
                customer_id,
                status,
                substatus,
                note,
                updated_at,
            });
        }

        if not_newer > 0 {
            tracing::debug!(
                "Skipped {} source rows not newer than {} (non-canonical timestamp text)",
                not_newer,
                since
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn seeded_source(dir: &tempfile::TempDir) -> SqliteSource {
        let handle =
            SqliteHandle::open(&dir.path().join("source.db"), Duration::from_secs(1)).unwrap();
        {
            let conn = handle.lock().unwrap();
            conn.execute_batch(
                "CREATE TABLE cliente_acomp (
                    id_cliente INTEGER PRIMARY KEY,
                    status TEXT, substatus TEXT, obs TEXT,
                    atualizado_em TEXT NOT NULL
                )",
            )
            .unwrap();
            for (id, status, hour) in [(1, "ACTIVE", 9), (2, "PAUSED", 10), (3, "CLOSED", 11)] {
                conn.execute(
                    "INSERT INTO cliente_acomp VALUES (?1, ?2, NULL, 'ok', ?3)",
                    rusqlite::params![id, status, format_timestamp(&ts(hour))],
                )
                .unwrap();
            }
        }
        SqliteSource::new(handle, None)
    }

    #[tokio::test]
    async fn test_extract_from_epoch_reads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let source = seeded_source(&dir);
        let batch = Extractor::new(&source)
            .extract(DateTime::<Utc>::default())
            .await
            .unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.max_ts, Some(ts(11)));
        let first = batch.records.iter().find(|r| r.customer_id == 1).unwrap();
        assert_eq!(first.status.as_deref(), Some("ACTIVE"));
        assert_eq!(first.substatus, None);
        assert_eq!(first.note.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_extract_lower_bound_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let source = seeded_source(&dir);
        let batch = Extractor::new(&source).extract(ts(10)).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].customer_id, 3);
        assert_eq!(batch.since, ts(10));
    }

    #[tokio::test]
    async fn test_extract_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let source = seeded_source(&dir);
        let batch = Extractor::new(&source).extract(ts(11)).await.unwrap();

        assert!(batch.is_empty());
        assert_eq!(batch.max_ts, None);
    }

    #[tokio::test]
    async fn test_extract_custom_query() {
        let dir = tempfile::tempdir().unwrap();
        let seeded = seeded_source(&dir);
        let source = SqliteSource::new(
            seeded.handle,
            Some(
                "SELECT id_cliente, upper(status), substatus, obs, atualizado_em \
                 FROM cliente_acomp WHERE atualizado_em > ?1 AND status <> 'CLOSED'"
                    .to_string(),
            ),
        );
        let batch = Extractor::new(&source)
            .extract(DateTime::<Utc>::default())
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.max_ts, Some(ts(10)));
    }

    #[tokio::test]
    async fn test_seconds_precision_text_respects_exclusive_bound() {
        let dir = tempfile::tempdir().unwrap();
        let source = seeded_source(&dir);
        // Sorts after "2024-03-01T12:00:00.000000Z" as text ('Z' > '.')
        source
            .handle
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO cliente_acomp VALUES (4, 'ACTIVE', NULL, NULL, '2024-03-01T12:00:00Z')",
                [],
            )
            .unwrap();

        let at_row = Extractor::new(&source).extract(ts(12)).await.unwrap();
        assert!(at_row.is_empty());
        assert_eq!(at_row.max_ts, None);

        let before_row = Extractor::new(&source).extract(ts(11)).await.unwrap();
        assert_eq!(before_row.len(), 1);
        assert_eq!(before_row.records[0].customer_id, 4);
        assert_eq!(before_row.max_ts, Some(ts(12)));
    }

    #[test]
    fn test_watermark_param_matches_column_type() {
        let since = ts(10);
        let naive = since.naive_utc();

        let param = watermark_param(Some(&Type::TIMESTAMP), &since, &naive);
        assert_eq!(format!("{:?}", param), format!("{:?}", naive));

        for ty in [Some(&Type::TIMESTAMPTZ), None] {
            let param = watermark_param(ty, &since, &naive);
            assert_eq!(format!("{:?}", param), format!("{:?}", since));
        }
    }

    #[tokio::test]
    async fn test_malformed_query_is_query_error() {
        let dir = tempfile::tempdir().unwrap();
        let seeded = seeded_source(&dir);
        let source = SqliteSource::new(seeded.handle, Some("SELECT FROM nowhere".to_string()));
        let err = Extractor::new(&source)
            .extract(DateTime::<Utc>::default())
            .await
            .unwrap_err();
        assert!(err.is_query());
    }
}
