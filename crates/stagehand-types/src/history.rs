//! Queue history records.
//!
//! A history record is written once per run when the controller reaches
//! Collecting, and is never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::{ObjectMeta, QueueItem};

/// Immutable per-run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHistory {
    /// Identity; the name embeds the run timestamp
    pub metadata: ObjectMeta,

    /// Snapshot of the run
    pub spec: QueueHistorySpec,
}

/// Snapshot captured at Collecting time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHistorySpec {
    /// The queue item as it stood when collected
    pub queue: QueueItem,

    /// Stable component versions recorded for this run
    #[serde(default)]
    pub stable_components: Vec<StableComponent>,

    /// When the record was written
    pub created_at: DateTime<Utc>,
}

/// A component version considered stable after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableComponent {
    /// Component name
    pub name: String,

    /// Image repository
    pub repository: String,

    /// Verified version
    pub version: String,
}

/// History record name: `{itemName}-{UTC yyyymmdd-HHMMSS}`.
pub fn history_name(queue_name: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", queue_name, now.format("%Y%m%d-%H%M%S"))
}
