//! Exporters
//!
//! - `SnapshotExporter` - full, deterministic, content-hashed snapshot of a
//!   curated dataset per partition date, plus a manifest and a `latest` alias
//! - `IncrementalExporter` - delivers rows past the dataset's watermark to a
//!   `TabularSink` and advances the watermark only after acknowledgement

mod curated;
mod incremental;
mod snapshot;
mod types;

pub use curated::CuratedQuery;
pub use incremental::IncrementalExporter;
pub use snapshot::{latest_alias_path, SnapshotExporter};
pub use types::{ExportManifest, IncrementalReport};
