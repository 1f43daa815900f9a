// ABOUTME: Merger for delta sync - applies extracted records to the destination table
// ABOUTME: Uses paged INSERT ... ON CONFLICT DO UPDATE with a never-regressing timestamp column

use async_trait::async_trait;
use rusqlite::types::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::record::{latest_per_customer, ChangeRecord, MergeOutcome};
use super::schema::{build_upsert_query, effective_page_size, Dialect};
use crate::error::{Result, SyncError};
use crate::sqlite::{format_timestamp, SqliteHandle};

/// Read/write interface to the destination store.
#[async_trait]
pub trait MergeTarget: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Create the destination and watermark tables if they do not exist.
    async fn ensure_tables(&self) -> Result<()>;

    /// Upsert `records` in pages of at most `page_size` rows.
    ///
    /// All pages commit together or not at all. Returns the number of rows sent.
    async fn upsert(&mut self, records: &[ChangeRecord], page_size: usize) -> Result<u64>;
}

/// Applies a batch of change records to a [`MergeTarget`].
pub struct Merger<'a> {
    target: &'a mut dyn MergeTarget,
    page_size: usize,
}

impl<'a> Merger<'a> {
    pub fn new(target: &'a mut dyn MergeTarget, page_size: usize) -> Self {
        Self { target, page_size }
    }

    /// Upsert `records` keyed on customer id.
    ///
    /// An empty slice touches nothing and yields [`MergeOutcome::Empty`].
    /// Repeated customers are collapsed to their newest revision first; the
    /// returned count is the number of rows sent after that collapse.
    pub async fn apply(&mut self, records: &[ChangeRecord]) -> Result<MergeOutcome> {
        if records.is_empty() {
            tracing::debug!("No records to merge");
            return Ok(MergeOutcome::Empty);
        }

        let latest = latest_per_customer(records);
        if latest.len() < records.len() {
            tracing::debug!(
                "Collapsed {} records to {} distinct customers",
                records.len(),
                latest.len()
            );
        }

        let page_size = effective_page_size(self.target.dialect(), self.page_size);
        let count = self.target.upsert(&latest, page_size).await?;

        tracing::info!(
            "Merged {} rows into destination ({} per page)",
            count,
            page_size
        );
        Ok(MergeOutcome::Applied { count })
    }
}

/// PostgreSQL destination.
pub struct PostgresTarget {
    client: Client,
}

impl PostgresTarget {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MergeTarget for PostgresTarget {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ensure_tables(&self) -> Result<()> {
        self.client
            .batch_execute(Dialect::Postgres.create_tables_sql())
            .await
            .map_err(|e| SyncError::from_postgres("Failed to create destination tables", e))
    }

    async fn upsert(&mut self, records: &[ChangeRecord], page_size: usize) -> Result<u64> {
        let tx = self
            .client
            .transaction()
            .await
            .map_err(|e| SyncError::from_postgres("Failed to begin merge transaction", e))?;

        let mut sent = 0u64;
        for page in records.chunks(page_size) {
            let query = build_upsert_query(Dialect::Postgres, page.len());

            // Flatten all record values into a single params vector
            let params: Vec<&(dyn ToSql + Sync)> = page
                .iter()
                .flat_map(|r| {
                    [
                        &r.customer_id as &(dyn ToSql + Sync),
                        &r.status as &(dyn ToSql + Sync),
                        &r.substatus as &(dyn ToSql + Sync),
                        &r.note as &(dyn ToSql + Sync),
                        &r.updated_at as &(dyn ToSql + Sync),
                    ]
                })
                .collect();

            tx.execute(&query, &params)
                .await
                .map_err(|e| SyncError::from_postgres("Failed to upsert page into destination", e))?;
            sent += page.len() as u64;
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()
            .await
            .map_err(|e| SyncError::from_postgres("Failed to commit merge transaction", e))?;
        Ok(sent)
    }
}

/// SQLite destination.
pub struct SqliteTarget {
    handle: SqliteHandle,
}

impl SqliteTarget {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl MergeTarget for SqliteTarget {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn ensure_tables(&self) -> Result<()> {
        let conn = self.handle.lock()?;
        conn.execute_batch(Dialect::Sqlite.create_tables_sql())
            .map_err(|e| SyncError::query("Failed to create destination tables", e))
    }

    async fn upsert(&mut self, records: &[ChangeRecord], page_size: usize) -> Result<u64> {
        let conn = self.handle.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| SyncError::query("Failed to begin merge transaction", e))?;

        let mut sent = 0u64;
        for page in records.chunks(page_size) {
            let query = build_upsert_query(Dialect::Sqlite, page.len());
            let values: Vec<Value> = page.iter().flat_map(record_to_values).collect();

            tx.execute(&query, rusqlite::params_from_iter(values.iter()))
                .map_err(|e| SyncError::query("Failed to upsert page into destination", e))?;
            sent += page.len() as u64;
        }

        tx.commit()
            .map_err(|e| SyncError::query("Failed to commit merge transaction", e))?;
        Ok(sent)
    }
}

fn record_to_values(record: &ChangeRecord) -> [Value; 5] {
    let text = |v: &Option<String>| v.clone().map(Value::Text).unwrap_or(Value::Null);
    [
        Value::Integer(i64::from(record.customer_id)),
        text(&record.status),
        text(&record.substatus),
        text(&record.note),
        Value::Text(format_timestamp(&record.updated_at)),
    ]
}
