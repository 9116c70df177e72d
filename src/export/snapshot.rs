//! Snapshot exporter

use super::curated::CuratedQuery;
use super::types::ExportManifest;
use crate::config::{DatasetConfig, SnapshotConfig};
use crate::error::{Error, Result};
use crate::output::{build_partitioned_path, dataset_dir, serialize_batch, SnapshotDestination};
use crate::warehouse::Warehouse;
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

/// Default alias for the most recent snapshot: `{dataset}/latest.{ext}`
pub fn latest_alias_path(dataset: &str, extension: &str) -> String {
    format!("{}/latest.{extension}", dataset_dir(dataset))
}

/// Writes full snapshots of curated datasets
#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    warehouse: Arc<Warehouse>,
}

impl SnapshotExporter {
    /// Create an exporter over a warehouse
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Export a dataset to its configured destination
    pub async fn export(
        &self,
        dataset: &DatasetConfig,
        partition: NaiveDate,
    ) -> Result<ExportManifest> {
        let snapshot = dataset.snapshot.as_ref().ok_or_else(|| {
            Error::config(format!("dataset '{}' has no snapshot export", dataset.name))
        })?;
        let destination = SnapshotDestination::parse(&snapshot.destination)?;
        self.export_to(dataset, snapshot, &destination, partition)
            .await
    }

    /// Export a dataset to an explicit destination.
    ///
    /// Object order is data, manifest, alias. A crash between writes leaves
    /// the previous alias in place, and a rerun rewrites the same partition.
    pub async fn export_to(
        &self,
        dataset: &DatasetConfig,
        snapshot: &SnapshotConfig,
        destination: &SnapshotDestination,
        partition: NaiveDate,
    ) -> Result<ExportManifest> {
        let query = CuratedQuery::for_dataset(dataset)?;
        let warehouse = Arc::clone(&self.warehouse);
        let mut batch =
            tokio::task::spawn_blocking(move || warehouse.with_conn(|conn| query.select_all(conn)))
                .await
                .map_err(Error::task)??;
        batch.sort_deterministic();

        let bytes = serialize_batch(&batch, snapshot.format)?;
        let content_hash = hex::encode(Sha256::digest(&bytes));

        let extension = snapshot.format.extension();
        let data_path =
            build_partitioned_path(&dataset.name, partition, &format!("data.{extension}"));
        let manifest_path = build_partitioned_path(&dataset.name, partition, "manifest.json");
        let latest_path = snapshot
            .latest_path
            .clone()
            .unwrap_or_else(|| latest_alias_path(&dataset.name, extension));

        let manifest = ExportManifest {
            dataset: dataset.name.clone(),
            partition_key: partition.format("%Y-%m-%d").to_string(),
            row_count: batch.len() as u64,
            content_hash,
            generated_at: Utc::now().naive_utc(),
            path: data_path.clone(),
            format: snapshot.format,
            latest_path: latest_path.clone(),
        };

        destination.put(&data_path, Bytes::from(bytes)).await?;
        destination
            .put(
                &manifest_path,
                Bytes::from(serde_json::to_vec_pretty(&manifest)?),
            )
            .await?;
        destination.copy(&data_path, &latest_path).await?;

        info!(
            dataset = %dataset.name,
            partition = %manifest.partition_key,
            rows = manifest.row_count,
            content_hash = %manifest.content_hash,
            location = %destination.location(&data_path),
            "Exported snapshot"
        );

        Ok(manifest)
    }
}
