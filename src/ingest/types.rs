//! Ingestion outcomes and reports

use serde::{Deserialize, Serialize};

/// Result of loading one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Rows staged and ledger entry committed
    Ingested {
        /// Drop-zone-relative filename
        filename: String,
        /// Staged table
        table: String,
        /// Data rows parsed
        rows_read: u64,
        /// Rows written after in-file dedup
        rows_inserted: u64,
        /// File size
        size: u64,
        /// SHA-256 hex
        content_hash: String,
    },
    /// Same path and content already in the ledger
    AlreadyIngested {
        /// Drop-zone-relative filename
        filename: String,
    },
    /// Still being written; retry on a later scan
    NotStable {
        /// Drop-zone-relative filename
        filename: String,
    },
}

/// A file that failed to load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    /// Drop-zone-relative filename
    pub filename: String,
    /// Error kind, e.g. `parse_failure`
    pub kind: String,
    /// Error message
    pub message: String,
}

/// Summary of one drop-zone scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Files staged in this scan
    pub ingested: Vec<LoadOutcome>,
    /// Files skipped as already ingested
    pub already_ingested: Vec<String>,
    /// Files deferred because they were still changing
    pub not_stable: Vec<String>,
    /// Files that failed (parse errors, conflicts, IO)
    pub failed: Vec<FileFailure>,
    /// Files with no matching route
    pub unrouted: Vec<String>,
}

impl IngestReport {
    /// Add a successful outcome
    pub fn record(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Ingested { .. } => self.ingested.push(outcome),
            LoadOutcome::AlreadyIngested { filename } => self.already_ingested.push(filename),
            LoadOutcome::NotStable { filename } => self.not_stable.push(filename),
        }
    }

    /// Total rows inserted across ingested files
    pub fn rows_inserted(&self) -> u64 {
        self.ingested
            .iter()
            .map(|outcome| match outcome {
                LoadOutcome::Ingested { rows_inserted, .. } => *rows_inserted,
                _ => 0,
            })
            .sum()
    }

    /// Check whether any file failed
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}
