// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # dropledger
//!
//! Idempotent ingestion of CSV drops into a DuckDB warehouse, and
//! watermark-driven export of curated datasets.
//!
//! ## Features
//!
//! - **Exactly-once ingestion**: every `(filename, content)` is staged once;
//!   a changed re-drop under the same name is flagged, never merged
//! - **Stability gating**: files still being written are deferred
//! - **Atomic loads**: a file's rows and its ledger entry commit together
//! - **Snapshots**: deterministic CSV or Parquet partitions plus a manifest,
//!   to a local directory or an object store
//! - **Incremental export**: rows past a monotonic `(ts, id)` watermark are
//!   appended to an HTTP endpoint, a spreadsheet or a CSV file
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dropledger::{config::PipelineConfig, engine::Pipeline, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = PipelineConfig::from_file("dropledger.yaml")?;
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     let report = pipeline.run(chrono::Utc::now().date_naive()).await?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   drop zone ──► Stability ──► Fingerprint ──► Ledger gate ──► Batch Loader
//!                                                                  │
//!                                          raw.* staged tables ◄───┘
//!                                                   │
//!                                  Transformer ──► curated.* tables
//!                                                   │
//!                                             Quality gate
//!                                   ┌───────────────┴───────────────┐
//!                          Snapshot exporter               Incremental exporter
//!                     (object_store: data, manifest,     (sink append, then
//!                              latest alias)               watermark advance)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(missing_docs)] // TODO: Document error variant fields before 1.0

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Row keys, curated batches and timestamp helpers
pub mod types;

/// DuckDB warehouse handle
pub mod warehouse;

/// Drop-zone ingestion
pub mod ingest;

/// Export watermarks
pub mod state;

/// Snapshot serialization and destinations
pub mod output;

/// Snapshot and incremental exporters
pub mod export;

/// Incremental sinks
pub mod sink;

/// Sink authentication
pub mod auth;

/// HTTP client with retry and rate limiting
pub mod http;

/// Pipeline runs, transforms and the quality gate
pub mod engine;

/// Pipeline configuration
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use config::PipelineConfig;
pub use engine::{Pipeline, RunReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
