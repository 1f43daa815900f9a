// ABOUTME: Watermark-driven delta sync of customer status records
// ABOUTME: Extracts rows newer than the watermark, upserts them, then advances the watermark

pub mod advancer;
pub mod daemon;
pub mod endpoint;
pub mod reader;
pub mod record;
pub mod schema;
pub mod state;
pub mod writer;

pub use advancer::{commit_point, WatermarkAdvancer};
pub use daemon::{RunReport, SyncDaemon};
pub use endpoint::Endpoint;
pub use reader::{ChangeSource, Extractor, PostgresSource, SqliteSource};
pub use record::{AdvancePayload, ChangeRecord, ExtractedBatch, MergeOutcome, WatermarkPayload};
pub use schema::Dialect;
pub use state::{PostgresWatermarkStore, SqliteWatermarkStore, WatermarkStore};
pub use writer::{MergeTarget, Merger, PostgresTarget, SqliteTarget};
