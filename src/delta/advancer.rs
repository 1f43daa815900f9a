// ABOUTME: WatermarkAdvancer for delta sync - commits the new high-water mark after a merge
// ABOUTME: Writes only when the merge applied rows and the batch produced a maximum timestamp

use chrono::{DateTime, Utc};

use super::record::MergeOutcome;
use super::state::WatermarkStore;
use crate::error::Result;

/// Moves the watermark for one sync key forward after a successful merge.
///
/// Must only be called once the merge has returned successfully. If the
/// process dies between merge and advance, the next run re-extracts the same
/// rows from the old watermark and the merge converges to the same state.
pub struct WatermarkAdvancer<'a> {
    store: &'a dyn WatermarkStore,
    key: &'a str,
}

impl<'a> WatermarkAdvancer<'a> {
    pub fn new(store: &'a dyn WatermarkStore, key: &'a str) -> Self {
        Self { store, key }
    }

    /// Write `max_ts` iff `outcome` applied at least one row and `max_ts` is present.
    ///
    /// Returns whether a write happened. Skipping is not an error.
    pub async fn advance(
        &self,
        max_ts: Option<DateTime<Utc>>,
        outcome: MergeOutcome,
    ) -> Result<bool> {
        let Some(max_ts) = commit_point(self.key, max_ts, outcome) else {
            return Ok(false);
        };

        self.store.write(self.key, max_ts).await?;
        tracing::info!("Advanced watermark '{}' to {}", self.key, max_ts);
        Ok(true)
    }
}

/// The value the watermark for `key` should move to, or `None` when this merge
/// must not move it. Callers use it to skip opening a store at all.
pub fn commit_point(
    key: &str,
    max_ts: Option<DateTime<Utc>>,
    outcome: MergeOutcome,
) -> Option<DateTime<Utc>> {
    match (outcome, max_ts) {
        (MergeOutcome::Applied { count }, Some(max_ts)) if count > 0 => Some(max_ts),
        _ => {
            tracing::info!("No changes applied; watermark '{}' not updated", key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::schema::Dialect;
    use crate::delta::state::SqliteWatermarkStore;
    use crate::sqlite::SqliteHandle;
    use chrono::TimeZone;
    use std::time::Duration;

    fn open_store(dir: &tempfile::TempDir) -> SqliteWatermarkStore {
        let handle =
            SqliteHandle::open(&dir.path().join("dest.db"), Duration::from_secs(1)).unwrap();
        handle
            .lock()
            .unwrap()
            .execute_batch(Dialect::Sqlite.create_tables_sql())
            .unwrap();
        SqliteWatermarkStore::new(handle)
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_advance_after_applied_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let advancer = WatermarkAdvancer::new(&store, "clientes");

        let committed = advancer
            .advance(Some(ts()), MergeOutcome::Applied { count: 1 })
            .await
            .unwrap();
        assert!(committed);
        assert_eq!(store.fetch("clientes").await.unwrap(), Some(ts()));
    }

    #[tokio::test]
    async fn test_no_advance_on_empty_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let advancer = WatermarkAdvancer::new(&store, "clientes");

        let committed = advancer
            .advance(Some(ts()), MergeOutcome::Empty)
            .await
            .unwrap();
        assert!(!committed);
        assert_eq!(store.fetch("clientes").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_advance_on_zero_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let advancer = WatermarkAdvancer::new(&store, "clientes");

        let committed = advancer
            .advance(Some(ts()), MergeOutcome::Applied { count: 0 })
            .await
            .unwrap();
        assert!(!committed);
        assert_eq!(store.fetch("clientes").await.unwrap(), None);
    }

    #[test]
    fn test_commit_point_requires_rows_and_max_ts() {
        let applied = MergeOutcome::Applied { count: 2 };
        assert_eq!(commit_point("clientes", Some(ts()), applied), Some(ts()));
        assert_eq!(commit_point("clientes", None, applied), None);
        assert_eq!(commit_point("clientes", Some(ts()), MergeOutcome::Empty), None);
        assert_eq!(
            commit_point("clientes", Some(ts()), MergeOutcome::Applied { count: 0 }),
            None
        );
    }

    #[tokio::test]
    async fn test_no_advance_without_max_ts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.write("clientes", ts()).await.unwrap();
        let advancer = WatermarkAdvancer::new(&store, "clientes");

        let committed = advancer
            .advance(None, MergeOutcome::Applied { count: 3 })
            .await
            .unwrap();
        assert!(!committed);
        // Existing watermark is not overwritten with an absent value
        assert_eq!(store.fetch("clientes").await.unwrap(), Some(ts()));
    }
}
