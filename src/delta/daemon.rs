// ABOUTME: SyncDaemon for delta sync - runs each stage on its own short-lived connection
// ABOUTME: Exposes the stages as separate steps and runs full cycles once or on an interval

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tokio::time::interval;

use super::advancer::{commit_point, WatermarkAdvancer};
use super::endpoint::Endpoint;
use super::reader::Extractor;
use super::record::{AdvancePayload, ExtractedBatch, MergeOutcome, WatermarkPayload};
use super::writer::Merger;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::postgres::ConnectOptions;

/// What one sync cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub key: String,
    /// Watermark the extraction started from
    pub watermark_before: DateTime<Utc>,
    pub rows_extracted: usize,
    pub outcome: MergeOutcome,
    /// Whether the watermark was written
    pub committed: bool,
    /// Watermark after the cycle (unchanged when nothing was committed)
    pub watermark_after: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Stage runner bound to a source, a destination and a configuration.
///
/// Every stage opens the connection it needs and drops it before returning, so
/// no connection outlives a stage or spans the gap between cycles.
pub struct SyncDaemon {
    source: Option<Endpoint>,
    target: Option<Endpoint>,
    config: SyncConfig,
    options: ConnectOptions,
}

impl SyncDaemon {
    /// Create a daemon for the full pipeline.
    pub fn new(source: Endpoint, target: Endpoint, config: SyncConfig, options: ConnectOptions) -> Self {
        Self {
            source: Some(source),
            target: Some(target),
            config,
            options,
        }
    }

    /// Create a daemon that can only run destination-side steps
    /// (provision, read watermark, merge, advance).
    pub fn for_target(target: Endpoint, config: SyncConfig, options: ConnectOptions) -> Self {
        Self {
            source: None,
            target: Some(target),
            config,
            options,
        }
    }

    /// Create a daemon that can only extract.
    pub fn for_source(source: Endpoint, config: SyncConfig, options: ConnectOptions) -> Self {
        Self {
            source: Some(source),
            target: None,
            config,
            options,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn source(&self) -> Result<&Endpoint> {
        self.source
            .as_ref()
            .ok_or_else(|| SyncError::Config("extraction requires a source endpoint".to_string()))
    }

    fn target(&self) -> Result<&Endpoint> {
        self.target.as_ref().ok_or_else(|| {
            SyncError::Config("this step requires a destination endpoint".to_string())
        })
    }

    /// Ensure the destination and watermark tables exist.
    pub async fn provision(&self) -> Result<()> {
        let endpoint = self.target()?;
        let target = endpoint.open_target(&self.options).await?;
        target.ensure_tables().await?;
        tracing::info!("Destination tables ready on {}", endpoint);
        Ok(())
    }

    /// Read the watermark for the configured key (epoch default on first run).
    pub async fn read_watermark(&self) -> Result<WatermarkPayload> {
        let store = self.target()?.open_watermark_store(&self.options).await?;
        let last_ts = store.read(&self.config.sync_key, self.config.epoch).await?;
        tracing::info!("Watermark '{}' is {}", self.config.sync_key, last_ts);
        Ok(WatermarkPayload {
            key: self.config.sync_key.clone(),
            last_ts,
        })
    }

    /// Extract source rows changed after `watermark`.
    pub async fn extract(&self, watermark: &WatermarkPayload) -> Result<ExtractedBatch> {
        let source = self
            .source()?
            .open_source(&self.options, self.config.source_query.clone())
            .await?;
        Extractor::new(source.as_ref()).extract(watermark.last_ts).await
    }

    /// Merge an extracted batch into the destination.
    pub async fn merge(&self, batch: &ExtractedBatch) -> Result<MergeOutcome> {
        // Skip connecting at all when there is nothing to write
        if batch.is_empty() {
            tracing::info!("No new or updated source rows");
            return Ok(MergeOutcome::Empty);
        }
        let mut target = self.target()?.open_target(&self.options).await?;
        Merger::new(target.as_mut(), self.config.page_size)
            .apply(&batch.records)
            .await
    }

    /// Advance the watermark for a merged batch.
    pub async fn advance(&self, batch: &ExtractedBatch, outcome: MergeOutcome) -> Result<AdvancePayload> {
        let key = self.config.sync_key.as_str();
        let committed = match commit_point(key, batch.max_ts, outcome) {
            Some(_) => {
                let store = self.target()?.open_watermark_store(&self.options).await?;
                WatermarkAdvancer::new(store.as_ref(), key)
                    .advance(batch.max_ts, outcome)
                    .await?
            }
            None => false,
        };

        Ok(AdvancePayload {
            key: key.to_string(),
            committed,
            last_ts: if committed { batch.max_ts } else { None },
        })
    }

    /// Run the stages once, in order.
    ///
    /// A failure in any stage returns before the watermark is touched.
    pub async fn run_sync_cycle(&self) -> Result<RunReport> {
        let start = Instant::now();

        let watermark = self.read_watermark().await?;
        let batch = self.extract(&watermark).await?;
        let outcome = self.merge(&batch).await?;
        let advanced = self.advance(&batch, outcome).await?;

        Ok(RunReport {
            key: advanced.key,
            watermark_before: watermark.last_ts,
            rows_extracted: batch.len(),
            outcome,
            committed: advanced.committed,
            watermark_after: advanced.last_ts.unwrap_or(watermark.last_ts),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run cycles at the configured interval until `shutdown` fires.
    ///
    /// A failed cycle is logged and the next one starts from the unchanged
    /// watermark. Shutdown during a cycle abandons it before the watermark
    /// is advanced unless the advance already completed.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) -> Result<()> {
        let mut sync_interval = interval(self.config.sync_interval());
        let mut cycles = 0u64;

        tracing::info!(
            "Starting SyncDaemon for '{}' with sync_interval={:?}",
            self.config.sync_key,
            self.config.sync_interval()
        );

        loop {
            tokio::select! {
                biased; // Check shutdown first

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping SyncDaemon");
                    break;
                }
                _ = sync_interval.tick() => {
                    cycles += 1;
                    tracing::info!("Starting sync cycle {}", cycles);

                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => {
                            tracing::info!("Shutdown signal received during sync cycle, aborting");
                            break;
                        }
                        result = self.run_sync_cycle() => {
                            match result {
                                Ok(report) => {
                                    tracing::info!(
                                        "Sync cycle {} completed: {} rows extracted, {} merged, watermark {} -> {} in {}ms",
                                        cycles,
                                        report.rows_extracted,
                                        report.outcome.rows_affected(),
                                        report.watermark_before,
                                        report.watermark_after,
                                        report.duration_ms
                                    );
                                }
                                Err(e) => {
                                    // Log with :? to show full error chain including root cause
                                    tracing::error!("Sync cycle {} failed: {:?}", cycles, e);
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
