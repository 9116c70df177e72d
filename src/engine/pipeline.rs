//! Pipeline orchestration
//!
//! One run is: ingest the drop zone, transform, evaluate the quality gate,
//! then export every configured dataset. Each step commits on its own; a
//! crash between steps is recovered by the next run.

use super::gate::{build_gate, GateDecision, QualityGate};
use super::transform::{build_transformer, TransformReport, Transformer};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::export::{ExportManifest, IncrementalExporter, IncrementalReport, SnapshotExporter};
use crate::ingest::{BatchLoader, IngestLedger, IngestReport, Router, StabilityDetector};
use crate::sink::{build_sink, TabularSink};
use crate::state::WatermarkStore;
use crate::warehouse::Warehouse;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A dataset-scoped failure recorded during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFailure {
    /// Dataset name, or the step name for run-wide steps
    pub dataset: String,
    /// `transform`, `quality_gate`, `snapshot` or `incremental`
    pub stage: String,
    /// Error kind, e.g. `sink_delivery_failure`
    pub kind: String,
    /// Error message
    pub message: String,
}

impl DatasetFailure {
    fn new(dataset: &str, stage: &str, err: &Error) -> Self {
        Self {
            dataset: dataset.to_string(),
            stage: stage.to_string(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Drop-zone scan
    pub ingest: IngestReport,
    /// Transformation, if it ran to completion
    pub transform: Option<TransformReport>,
    /// Quality gate decision, if the gate was evaluated
    pub gate: Option<GateDecision>,
    /// Snapshots written
    pub snapshots: Vec<ExportManifest>,
    /// Incremental exports performed
    pub incremental: Vec<IncrementalReport>,
    /// Non-fatal failures after ingestion
    pub failures: Vec<DatasetFailure>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl RunReport {
    /// Record a failure
    pub fn add_failure(&mut self, dataset: &str, stage: &str, err: &Error) {
        self.failures.push(DatasetFailure::new(dataset, stage, err));
    }

    /// Check if exports were blocked by the quality gate
    pub fn is_rejected(&self) -> bool {
        matches!(self.gate, Some(GateDecision::Rejected { .. }))
    }

    /// Check if every step succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.ingest.has_failures() && !self.is_rejected()
    }

    /// Turn a gate rejection into an error
    pub fn ensure_approved(&self) -> Result<()> {
        match &self.gate {
            Some(GateDecision::Rejected { reason }) => Err(Error::QualityGateRejected {
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}

/// The ingestion and export pipeline
pub struct Pipeline {
    config: PipelineConfig,
    warehouse: Arc<Warehouse>,
    loader: Arc<BatchLoader>,
    transformer: Box<dyn Transformer>,
    gate: Box<dyn QualityGate>,
    sinks: HashMap<String, Arc<dyn TabularSink>>,
    snapshots: SnapshotExporter,
    incremental: IncrementalExporter,
}

impl Pipeline {
    /// Open the configured warehouse and build the pipeline
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let warehouse = if config.warehouse.is_in_memory() {
            Warehouse::open_in_memory()?
        } else {
            Warehouse::open(&config.warehouse.path)?
        };
        Self::with_warehouse(config, Arc::new(warehouse))
    }

    /// Build the pipeline over an already opened warehouse
    pub fn with_warehouse(config: PipelineConfig, warehouse: Arc<Warehouse>) -> Result<Self> {
        let router = Router::new(&config.sources)?;
        let loader = BatchLoader::new(
            Arc::clone(&warehouse),
            router,
            config.drop_zone.root.clone(),
            StabilityDetector::new(config.drop_zone.stability_window()),
        );

        Ok(Self {
            transformer: build_transformer(&config.transform),
            gate: build_gate(&config.quality_gate),
            sinks: HashMap::new(),
            snapshots: SnapshotExporter::new(Arc::clone(&warehouse)),
            incremental: IncrementalExporter::new(Arc::clone(&warehouse)),
            loader: Arc::new(loader),
            warehouse,
            config,
        })
    }

    /// Replace the sink of one dataset
    #[must_use]
    pub fn with_sink(mut self, dataset: impl Into<String>, sink: Arc<dyn TabularSink>) -> Self {
        self.sinks.insert(dataset.into(), sink);
        self
    }

    /// Replace the transformer
    #[must_use]
    pub fn with_transformer(mut self, transformer: Box<dyn Transformer>) -> Self {
        self.transformer = transformer;
        self
    }

    /// Replace the quality gate
    #[must_use]
    pub fn with_gate(mut self, gate: Box<dyn QualityGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Warehouse handle
    pub fn warehouse(&self) -> &Arc<Warehouse> {
        &self.warehouse
    }

    /// Ingestion ledger
    pub fn ledger(&self) -> IngestLedger {
        IngestLedger::new(Arc::clone(&self.warehouse))
    }

    /// Export watermarks
    pub fn watermarks(&self) -> &WatermarkStore {
        self.incremental.watermarks()
    }

    /// Scan the drop zone and stage every stable, routed file
    pub async fn ingest(&self) -> Result<IngestReport> {
        let loader = Arc::clone(&self.loader);
        tokio::task::spawn_blocking(move || loader.ingest_all())
            .await
            .map_err(Error::task)?
    }

    /// Run the transformation layer
    pub async fn transform(&self) -> Result<TransformReport> {
        tracing::info!(transformer = self.transformer.name(), "Running transformation");
        self.transformer.run(&self.warehouse).await
    }

    /// Evaluate the quality gate
    pub async fn check_quality(&self) -> Result<GateDecision> {
        let decision = self.gate.evaluate(&self.warehouse).await?;
        match &decision {
            GateDecision::Approved => {
                tracing::info!(gate = self.gate.name(), "Quality gate approved");
            }
            GateDecision::Rejected { reason } => {
                tracing::error!(gate = self.gate.name(), reason = %reason, "Quality gate rejected; exports blocked");
            }
        }
        Ok(decision)
    }

    /// Write a full snapshot of one dataset once the quality gate approves
    pub async fn export_snapshot(&self, name: &str, partition: NaiveDate) -> Result<ExportManifest> {
        self.config.dataset(name)?;
        self.require_approval().await?;
        self.snapshot_approved(name, partition).await
    }

    /// Deliver one dataset's new rows to its sink once the quality gate approves
    pub async fn export_incremental(&self, name: &str) -> Result<IncrementalReport> {
        self.config.dataset(name)?;
        self.require_approval().await?;
        self.incremental_approved(name).await
    }

    async fn require_approval(&self) -> Result<()> {
        match self.check_quality().await? {
            GateDecision::Approved => Ok(()),
            GateDecision::Rejected { reason } => Err(Error::QualityGateRejected { reason }),
        }
    }

    async fn snapshot_approved(&self, name: &str, partition: NaiveDate) -> Result<ExportManifest> {
        let dataset = self.config.dataset(name)?;
        self.snapshots.export(dataset, partition).await
    }

    async fn incremental_approved(&self, name: &str) -> Result<IncrementalReport> {
        let dataset = self.config.dataset(name)?;
        let sink = self.sink_for(name)?;
        self.incremental.export(dataset, sink.as_ref()).await
    }

    fn sink_for(&self, name: &str) -> Result<Arc<dyn TabularSink>> {
        if let Some(sink) = self.sinks.get(name) {
            return Ok(Arc::clone(sink));
        }
        let dataset = self.config.dataset(name)?;
        let incremental = dataset.incremental.as_ref().ok_or_else(|| {
            Error::config(format!("dataset '{name}' has no incremental export"))
        })?;
        build_sink(&incremental.sink, &self.config.http)
    }

    /// Run every step once.
    ///
    /// Per-file and per-dataset failures are recorded in the report. Fatal
    /// errors (ledger or watermark invariant violations) abort the run.
    pub async fn run(&self, partition: NaiveDate) -> Result<RunReport> {
        let start = Instant::now();
        let mut report = RunReport {
            ingest: self.ingest().await?,
            ..RunReport::default()
        };

        if self.run_gated_steps(&mut report).await? {
            self.run_exports(partition, &mut report).await?;
        }

        report.set_duration(start.elapsed().as_millis() as u64);
        tracing::info!(
            ingested = report.ingest.ingested.len(),
            snapshots = report.snapshots.len(),
            incremental = report.incremental.len(),
            failures = report.failures.len() + report.ingest.failed.len(),
            duration_ms = report.duration_ms,
            "Run complete"
        );
        Ok(report)
    }

    /// Transform and gate; returns whether exports may proceed
    async fn run_gated_steps(&self, report: &mut RunReport) -> Result<bool> {
        match self.transform().await {
            Ok(transform) => report.transform = Some(transform),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(error = %e, "Transformation failed; exports skipped");
                report.add_failure(self.transformer.name(), "transform", &e);
                return Ok(false);
            }
        }

        match self.check_quality().await {
            Ok(decision) => {
                let approved = decision.is_approved();
                report.gate = Some(decision);
                Ok(approved)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "Quality gate failed to evaluate; exports skipped");
                report.add_failure(self.gate.name(), "quality_gate", &e);
                Ok(false)
            }
        }
    }

    async fn run_exports(&self, partition: NaiveDate, report: &mut RunReport) -> Result<()> {
        for dataset in &self.config.datasets {
            if dataset.snapshot.is_some() {
                match self.snapshot_approved(&dataset.name, partition).await {
                    Ok(manifest) => report.snapshots.push(manifest),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::error!(dataset = %dataset.name, error = %e, "Snapshot export failed");
                        report.add_failure(&dataset.name, "snapshot", &e);
                    }
                }
            }

            if dataset.incremental.is_some() {
                match self.incremental_approved(&dataset.name).await {
                    Ok(incremental) => report.incremental.push(incremental),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        report.add_failure(&dataset.name, "incremental", &e);
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("warehouse", &self.warehouse)
            .field("drop_zone", &self.loader.drop_zone())
            .field("transformer", &self.transformer.name())
            .field("gate", &self.gate.name())
            .field("datasets", &self.config.datasets.len())
            .finish()
    }
}
