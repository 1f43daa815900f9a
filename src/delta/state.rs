// ABOUTME: WatermarkStore for delta sync - persists the high-water mark per sync key
// ABOUTME: One row per key in etl_watermark, read with an epoch fallback and written by upsert

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Client;

use super::schema::Dialect;
use crate::error::{Result, SyncError};
use crate::sqlite::{format_timestamp, timestamp_column, SqliteHandle};

/// Persisted cursor: the highest `updated_at` fully merged, per sync key.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Stored watermark for `key`, or `None` when the key has never been synced.
    async fn fetch(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Upsert the watermark row for `key`.
    ///
    /// A successful return is a commit point. Writing an older value than the
    /// stored one leaves the stored value in place.
    async fn write(&self, key: &str, ts: DateTime<Utc>) -> Result<()>;

    /// Stored watermark for `key`, or `epoch` on first run.
    async fn read(&self, key: &str, epoch: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let stored = self.fetch(key).await?;
        if stored.is_none() {
            tracing::info!("No watermark stored for '{}', starting from {}", key, epoch);
        }
        Ok(stored.unwrap_or(epoch))
    }
}

/// Watermark store backed by the `etl_watermark` table in PostgreSQL.
pub struct PostgresWatermarkStore {
    client: Client,
}

impl PostgresWatermarkStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WatermarkStore for PostgresWatermarkStore {
    async fn fetch(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let row = self
            .client
            .query_opt(&Dialect::Postgres.read_watermark_sql(), &[&key])
            .await
            .map_err(|e| SyncError::from_postgres(format!("Failed to read watermark '{}'", key), e))?;

        match row {
            Some(row) => row.try_get::<_, Option<DateTime<Utc>>>(0).map_err(|e| {
                SyncError::query(format!("Invalid watermark value for '{}'", key), e)
            }),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, ts: DateTime<Utc>) -> Result<()> {
        self.client
            .execute(&Dialect::Postgres.write_watermark_sql(), &[&key, &ts])
            .await
            .map_err(|e| {
                SyncError::from_postgres(format!("Failed to write watermark '{}'", key), e)
            })?;
        Ok(())
    }
}

/// Watermark store backed by the `etl_watermark` table in SQLite.
pub struct SqliteWatermarkStore {
    handle: SqliteHandle,
}

impl SqliteWatermarkStore {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn fetch(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.handle.lock()?;
        let mut stmt = conn
            .prepare(&Dialect::Sqlite.read_watermark_sql())
            .map_err(|e| SyncError::query("Failed to prepare watermark read", e))?;
        let mut rows = stmt
            .query([key])
            .map_err(|e| SyncError::query(format!("Failed to read watermark '{}'", key), e))?;

        match rows
            .next()
            .map_err(|e| SyncError::query(format!("Failed to read watermark '{}'", key), e))?
        {
            Some(row) => timestamp_column(row, 0)
                .map_err(|e| SyncError::query(format!("Invalid watermark value for '{}'", key), e)),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, ts: DateTime<Utc>) -> Result<()> {
        let conn = self.handle.lock()?;
        conn.execute(
            &Dialect::Sqlite.write_watermark_sql(),
            rusqlite::params![key, format_timestamp(&ts)],
        )
        .map_err(|e| SyncError::query(format!("Failed to write watermark '{}'", key), e))?;
        Ok(())
    }
}
