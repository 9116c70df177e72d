//! Export watermark state
//!
//! Tracks how far each dataset's incremental export has been delivered.
//! Watermarks live in the warehouse (`meta.export_watermark`) so they share
//! durability with the data they describe.
//!
//! # Overview
//!
//! The state module provides:
//! - `Watermark` - the last delivered `(ts, id)` position of a dataset
//! - `WatermarkStore` - read, monotonic advance, list and reset

mod store;
mod types;

pub use store::WatermarkStore;
pub use types::Watermark;
