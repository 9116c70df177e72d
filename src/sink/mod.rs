//! Incremental sinks
//!
//! A `TabularSink` accepts an ordered batch of curated rows and acknowledges
//! it by returning `Ok`. Only an acknowledged append may move a watermark.
//!
//! - `HttpAppendSink` - POST `{dataset, columns, rows}` to an endpoint
//! - `SheetsAppendSink` - spreadsheet values-append API with a header row
//! - `CsvFileSink` - append to a local CSV file

mod csv_file;
mod http;
mod sheets;

pub use csv_file::CsvFileSink;
pub use http::HttpAppendSink;
pub use sheets::{SheetsAppendSink, APPEND_PARAMS};

use crate::config::{HttpConfig, SinkConfig};
use crate::error::Result;
use crate::types::{cell_to_text, CuratedBatch};
use async_trait::async_trait;
use std::sync::Arc;

/// External tabular destination with append semantics
#[async_trait]
pub trait TabularSink: Send + Sync {
    /// Short sink name for logs and reports
    fn name(&self) -> &str;

    /// Append rows in order; `Ok` is the delivery acknowledgement
    async fn append(&self, dataset: &str, batch: &CuratedBatch) -> Result<()>;
}

/// Build the sink configured for a dataset
pub fn build_sink(config: &SinkConfig, http: &HttpConfig) -> Result<Arc<dyn TabularSink>> {
    let sink: Arc<dyn TabularSink> = match config {
        SinkConfig::Http { url, auth, headers } => {
            Arc::new(HttpAppendSink::new(url, auth.into(), headers, http)?)
        }
        SinkConfig::Sheets {
            spreadsheet_id,
            range,
            base_url,
            credentials,
            columns,
        } => Arc::new(SheetsAppendSink::from_service_account(
            base_url,
            spreadsheet_id,
            range,
            columns.clone(),
            credentials,
            http,
        )?),
        SinkConfig::CsvFile { path } => Arc::new(CsvFileSink::new(path)),
    };
    Ok(sink)
}

/// Render every row as text cells
pub fn rows_as_text(batch: &CuratedBatch) -> Vec<Vec<String>> {
    batch
        .rows
        .iter()
        .map(|row| row.values.iter().map(cell_to_text).collect())
        .collect()
}
