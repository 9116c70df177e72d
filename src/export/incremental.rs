//! Incremental exporter

use super::curated::CuratedQuery;
use super::types::IncrementalReport;
use crate::config::DatasetConfig;
use crate::error::{Error, Result};
use crate::sink::TabularSink;
use crate::state::WatermarkStore;
use crate::warehouse::Warehouse;
use std::sync::Arc;
use tracing::{error, info};

/// Delivers new curated rows to a sink, one watermark advance per
/// acknowledged append.
///
/// A crash after the sink acknowledges but before the advance commits means
/// the same rows are selected again on the next run (at-least-once delivery).
#[derive(Debug, Clone)]
pub struct IncrementalExporter {
    warehouse: Arc<Warehouse>,
    watermarks: WatermarkStore,
}

impl IncrementalExporter {
    /// Create an exporter over a warehouse
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        let watermarks = WatermarkStore::new(Arc::clone(&warehouse));
        Self {
            warehouse,
            watermarks,
        }
    }

    /// Watermark store used by this exporter
    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    /// Deliver every row past the dataset's watermark
    pub async fn export(
        &self,
        dataset: &DatasetConfig,
        sink: &dyn TabularSink,
    ) -> Result<IncrementalReport> {
        let watermarks = self.watermarks.clone();
        let name = dataset.name.clone();
        let before = tokio::task::spawn_blocking(move || watermarks.read(&name))
            .await
            .map_err(Error::task)??
            .key();

        let query = CuratedQuery::for_dataset(dataset)?;
        let warehouse = Arc::clone(&self.warehouse);
        let after = before.clone();
        let batch = tokio::task::spawn_blocking(move || {
            warehouse.with_conn(|conn| query.select_after(conn, &after))
        })
        .await
        .map_err(Error::task)??;

        let mut report = IncrementalReport {
            dataset: dataset.name.clone(),
            sink: sink.name().to_string(),
            rows_delivered: 0,
            appends: 0,
            watermark_before: before.clone(),
            watermark_after: before,
        };

        if batch.is_empty() {
            info!(dataset = %dataset.name, "No new rows to export");
            return Ok(report);
        }

        let chunk_size = dataset
            .incremental
            .as_ref()
            .and_then(|inc| inc.max_rows_per_append)
            .unwrap_or(0);

        for chunk in batch.chunks(chunk_size) {
            let Some(last) = chunk.last_key().cloned() else {
                continue;
            };

            if let Err(e) = sink.append(&dataset.name, &chunk).await {
                let err = match e {
                    Error::SinkDelivery { .. } => e,
                    other => Error::sink(&dataset.name, other.to_string()),
                };
                error!(
                    dataset = %dataset.name,
                    sink = sink.name(),
                    rows_delivered = report.rows_delivered,
                    error = %err,
                    "Sink delivery failed; watermark not advanced"
                );
                return Err(err);
            }

            let watermarks = self.watermarks.clone();
            let name = dataset.name.clone();
            let watermark = tokio::task::spawn_blocking(move || watermarks.advance(&name, &last))
                .await
                .map_err(Error::task)??;
            report.rows_delivered += chunk.len() as u64;
            report.appends += 1;
            report.watermark_after = watermark.key();
        }

        info!(
            dataset = %dataset.name,
            sink = sink.name(),
            rows = report.rows_delivered,
            appends = report.appends,
            watermark = %report.watermark_after,
            "Exported incremental rows"
        );

        Ok(report)
    }
}
