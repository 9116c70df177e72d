//! Output module
//!
//! Serializes curated batches and writes them to snapshot destinations.
//!
//! # Overview
//!
//! This module provides utilities for:
//! - Narrowing curated columns to Arrow types
//! - Serializing a batch as CSV or Parquet bytes
//! - Writing objects to local or cloud storage (S3, R2, GCS, Azure)

mod destination;
mod format;
mod schema;
mod writer;

pub use destination::{
    build_partitioned_dir, build_partitioned_path, dataset_dir, SnapshotDestination, StoreKind,
};
pub use format::{serialize_batch, write_csv};
pub use schema::{batch_to_arrow, infer_schema};
pub use writer::write_parquet_bytes;

#[cfg(test)]
mod tests;
