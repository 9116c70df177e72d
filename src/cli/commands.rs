//! CLI commands and argument parsing

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Drop-zone ingestion and watermark-driven export
#[derive(Parser, Debug)]
#[command(name = "dropledger")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Pipeline configuration file (YAML)
    #[arg(short, long, global = true, default_value = "dropledger.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest, transform, gate and export once
    Run {
        /// Snapshot partition date (YYYY-MM-DD, defaults to today UTC)
        #[arg(long)]
        partition: Option<NaiveDate>,
    },

    /// Scan the drop zone and stage new files
    Ingest,

    /// Export one dataset
    Export {
        #[command(subcommand)]
        command: ExportCommand,
    },

    /// Inspect or repair the ingestion ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },

    /// Inspect or reset export watermarks
    Watermark {
        #[command(subcommand)]
        command: WatermarkCommand,
    },

    /// Validate the pipeline configuration
    Validate,

    /// Start the HTTP trigger server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

/// Export subcommands
#[derive(Subcommand, Debug)]
pub enum ExportCommand {
    /// Write a full snapshot
    Snapshot {
        /// Dataset name
        dataset: String,

        /// Partition date (YYYY-MM-DD, defaults to today UTC)
        #[arg(long)]
        partition: Option<NaiveDate>,
    },

    /// Deliver rows past the watermark to the dataset's sink
    Incremental {
        /// Dataset name
        dataset: String,
    },
}

/// Ledger subcommands
#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// List ingested files
    List,

    /// Remove a file's entry so a corrected version can be ingested
    Forget {
        /// Drop-zone-relative filename
        filename: String,
    },
}

/// Watermark subcommands
#[derive(Subcommand, Debug)]
pub enum WatermarkCommand {
    /// Show one dataset's watermark, or all stored watermarks
    Show {
        /// Dataset name
        dataset: Option<String>,
    },

    /// Delete a watermark; the next incremental export redelivers everything
    Reset {
        /// Dataset name
        dataset: String,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One JSON document per line
    Json,
    /// Indented JSON
    Pretty,
}
