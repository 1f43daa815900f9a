// ABOUTME: Typed values passed between the delta sync stages
// ABOUTME: Change records, extracted batches, merge outcomes and step payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One customer's status snapshot as read from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Natural key of the destination table (`id_cliente`)
    pub customer_id: i32,
    pub status: Option<String>,
    pub substatus: Option<String>,
    /// Free-text observation (`obs`)
    pub note: Option<String>,
    /// Source change timestamp (`atualizado_em`)
    pub updated_at: DateTime<Utc>,
}

/// Output of the extraction stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedBatch {
    /// Exclusive lower bound the batch was extracted with
    pub since: DateTime<Utc>,
    pub records: Vec<ChangeRecord>,
    /// Highest `updated_at` in `records`; `None` when `records` is empty
    pub max_ts: Option<DateTime<Utc>>,
}

impl ExtractedBatch {
    pub fn new(since: DateTime<Utc>, records: Vec<ChangeRecord>) -> Self {
        let max_ts = records.iter().map(|r| r.updated_at).max();
        Self {
            since,
            records,
            max_ts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Result of the merge stage.
///
/// The watermark may only advance on `Applied`; an empty delta is `Empty`
/// rather than a zero count so the no-advance rule is carried by the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    Empty,
    Applied { count: u64 },
}

impl MergeOutcome {
    /// Rows sent to the destination (no-op updates included).
    pub fn rows_affected(&self) -> u64 {
        match self {
            MergeOutcome::Empty => 0,
            MergeOutcome::Applied { count } => *count,
        }
    }
}

/// Watermark as handed from the read step to the extract step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkPayload {
    pub key: String,
    /// Persisted watermark, or the epoch default when none exists
    pub last_ts: DateTime<Utc>,
}

/// Result of the advance step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancePayload {
    pub key: String,
    pub committed: bool,
    /// Timestamp written when `committed` is true
    pub last_ts: Option<DateTime<Utc>>,
}

/// Collapse repeated customers to their newest revision.
///
/// Keeps the record with the greatest `updated_at` per `customer_id`; on equal
/// timestamps the later record in the batch wins. First-seen order is kept.
pub fn latest_per_customer(records: &[ChangeRecord]) -> Vec<ChangeRecord> {
    let mut positions: HashMap<i32, usize> = HashMap::with_capacity(records.len());
    let mut latest: Vec<ChangeRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.customer_id) {
            Some(&idx) => {
                if record.updated_at >= latest[idx].updated_at {
                    latest[idx] = record.clone();
                }
            }
            None => {
                positions.insert(record.customer_id, latest.len());
                latest.push(record.clone());
            }
        }
    }

    latest
}
