//! Warehouse access via DuckDB
//!
//! A single DuckDB file holds the staged tables (`raw` schema), the curated
//! tables produced by transformations, and the bookkeeping tables in the
//! `meta` schema:
//!
//! - `meta.ingest_ledger` - one row per ingested drop-zone file
//! - `meta.export_watermark` - incremental export position per dataset
//!
//! The connection is guarded by a mutex; there is exactly one writer per
//! warehouse file.

mod engine;
mod values;

pub use engine::{Warehouse, LEDGER_TABLE, META_SCHEMA, RAW_SCHEMA, WATERMARK_TABLE};
pub use values::{duckdb_value_to_json, quote_ident, TableName};

pub(crate) use engine::{describe, select_values, table_columns, table_exists};
