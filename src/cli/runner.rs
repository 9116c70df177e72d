//! CLI runner - executes commands

use crate::cli::commands::{
    Cli, Commands, ExportCommand, LedgerCommand, OutputFormat, WatermarkCommand,
};
use crate::config::PipelineConfig;
use crate::engine::Pipeline;
use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Run { partition } => self.run_pipeline(*partition).await,
            Commands::Ingest => {
                let report = self.pipeline()?.ingest().await?;
                self.output(&report)?;
                if report.has_failures() {
                    return Err(Error::Other(format!(
                        "{} file(s) failed to ingest",
                        report.failed.len()
                    )));
                }
                Ok(())
            }
            Commands::Export { command } => self.export(command).await,
            Commands::Ledger { command } => self.ledger(command),
            Commands::Watermark { command } => self.watermark(command),
            Commands::Validate => self.validate(),
            Commands::Serve { port } => {
                let pipeline = Arc::new(self.pipeline()?);
                crate::cli::serve(pipeline, *port).await
            }
        }
    }

    /// Load and validate the pipeline configuration
    fn load_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::from_file(&self.cli.config)
    }

    fn pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_config(self.load_config()?)
    }

    async fn run_pipeline(&self, partition: Option<NaiveDate>) -> Result<()> {
        let report = self
            .pipeline()?
            .run(partition.unwrap_or_else(today))
            .await?;
        self.output(&report)?;

        report.ensure_approved()?;
        if !report.is_success() {
            return Err(Error::Other(format!(
                "run finished with {} failure(s)",
                report.failures.len() + report.ingest.failed.len()
            )));
        }
        Ok(())
    }

    async fn export(&self, command: &ExportCommand) -> Result<()> {
        let pipeline = self.pipeline()?;
        match command {
            ExportCommand::Snapshot { dataset, partition } => {
                let manifest = pipeline
                    .export_snapshot(dataset, partition.unwrap_or_else(today))
                    .await?;
                self.output(&manifest)
            }
            ExportCommand::Incremental { dataset } => {
                let report = pipeline.export_incremental(dataset).await?;
                self.output(&report)
            }
        }
    }

    fn ledger(&self, command: &LedgerCommand) -> Result<()> {
        let ledger = self.pipeline()?.ledger();
        match command {
            LedgerCommand::List => self.output(&ledger.list()?),
            LedgerCommand::Forget { filename } => {
                let removed = ledger.forget(filename)?;
                self.output(&json!({ "filename": filename, "removed": removed }))
            }
        }
    }

    fn watermark(&self, command: &WatermarkCommand) -> Result<()> {
        let pipeline = self.pipeline()?;
        let watermarks = pipeline.watermarks();
        match command {
            WatermarkCommand::Show { dataset: Some(dataset) } => {
                pipeline.config().dataset(dataset)?;
                self.output(&watermarks.read(dataset)?)
            }
            WatermarkCommand::Show { dataset: None } => self.output(&watermarks.list()?),
            WatermarkCommand::Reset { dataset } => {
                let removed = watermarks.reset(dataset)?;
                self.output(&json!({ "dataset": dataset, "removed": removed }))
            }
        }
    }

    /// Validate the configuration without opening the warehouse
    fn validate(&self) -> Result<()> {
        let config = self.load_config()?;
        self.output(&json!({
            "valid": true,
            "sources": config.sources.len(),
            "datasets": config.datasets.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        }))
    }

    fn output<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = match self.cli.format {
            OutputFormat::Json => serde_json::to_string(value)?,
            OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
        };
        println!("{text}");
        Ok(())
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("dropledger.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn runner(args: &[&str]) -> Runner {
        Runner::new(Cli::try_parse_from(args).unwrap())
    }

    #[tokio::test]
    async fn test_validate_accepts_good_config() {
        let dir = TempDir::new().unwrap();
        let config = write_config(
            &dir,
            &format!(
                "warehouse:\n  path: \":memory:\"\ndrop_zone:\n  root: {}\nsources:\n  - prefix: bank\n",
                dir.path().display()
            ),
        );
        let config = config.to_string_lossy().into_owned();
        runner(&["dropledger", "-c", &config, "validate"])
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_validate_rejects_duplicate_prefixes() {
        let dir = TempDir::new().unwrap();
        let config = write_config(
            &dir,
            &format!(
                "drop_zone:\n  root: {}\nsources:\n  - prefix: bank\n  - prefix: bank\n",
                dir.path().display()
            ),
        );
        let config = config.to_string_lossy().into_owned();
        let err = runner(&["dropledger", "-c", &config, "validate"])
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config { .. } | Error::InvalidConfigValue { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let err = runner(&["dropledger", "-c", "/nonexistent/dropledger.yaml", "ingest"])
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
