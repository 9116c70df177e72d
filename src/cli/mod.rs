//! CLI module
//!
//! Command-line interface for operating the pipeline.
//!
//! # Commands
//!
//! - `run` - Ingest, transform, gate and export once
//! - `ingest` - Stage new drop-zone files
//! - `export snapshot|incremental` - Export one dataset
//! - `ledger list|forget` - Inspect or repair the ingestion ledger
//! - `watermark show|reset` - Inspect or reset export watermarks
//! - `validate` - Check the configuration
//! - `serve` - Start the HTTP trigger server

mod commands;
mod runner;
mod server;

pub use commands::{Cli, Commands, ExportCommand, LedgerCommand, OutputFormat, WatermarkCommand};
pub use runner::Runner;
pub use server::{router, serve};
