//! Drop-zone ingestion
//!
//! Moves CSV files from the drop zone into staged warehouse tables with
//! exactly-once effect per `(filename, content)`.
//!
//! # Overview
//!
//! - `StabilityDetector` - decides whether a file's writer has finished
//! - `fingerprint` - size + SHA-256 content identity
//! - `IngestLedger` - durable record of ingested files
//! - `Router` - explicit prefix to staged-table routing
//! - `BatchLoader` - the per-file load transaction and the drop-zone scan

pub mod fingerprint;
pub mod ledger;
mod loader;
pub mod routing;
pub mod stability;
mod types;

pub use fingerprint::{fingerprint, Fingerprint};
pub use ledger::{IngestLedger, LedgerDecision, LedgerEntry};
pub use loader::{load_key, BatchLoader, INGESTED_AT_COLUMN, LOAD_KEY_COLUMN, SOURCE_FILE_COLUMN};
pub use routing::{Route, Router};
pub use stability::{StabilityDetector, DEFAULT_STABILITY_WINDOW};
pub use types::{FileFailure, IngestReport, LoadOutcome};
