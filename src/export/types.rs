//! Export results

use crate::config::SnapshotFormat;
use crate::types::RowKey;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Metadata written next to every snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Dataset name
    pub dataset: String,
    /// Partition date, `YYYY-MM-DD`
    pub partition_key: String,
    /// Rows in the snapshot
    pub row_count: u64,
    /// SHA-256 hex of the snapshot bytes
    pub content_hash: String,
    /// When the snapshot was produced (UTC)
    pub generated_at: NaiveDateTime,
    /// Snapshot path relative to the destination
    pub path: String,
    /// Serialization format
    pub format: SnapshotFormat,
    /// Alias path relative to the destination
    pub latest_path: String,
}

/// Outcome of one incremental export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalReport {
    /// Dataset name
    pub dataset: String,
    /// Sink name
    pub sink: String,
    /// Rows acknowledged by the sink
    pub rows_delivered: u64,
    /// Append calls made
    pub appends: u32,
    /// Watermark before the export
    pub watermark_before: RowKey,
    /// Watermark after the export
    pub watermark_after: RowKey,
}

impl IncrementalReport {
    /// Check whether the export found nothing to deliver
    pub fn is_noop(&self) -> bool {
        self.appends == 0
    }
}
