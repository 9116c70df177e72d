//! Spreadsheet values-append sink
//!
//! Appends rows below the existing table at the configured range. Requests
//! carry an OAuth access token obtained by exchanging a service-account JWT.
//!
//! Rows are projected onto the configured sheet columns. The header row is
//! sent with the first append into an empty range and never again.

use super::{rows_as_text, TabularSink};
use crate::auth::{AuthConfig, ServiceAccountKey};
use crate::config::{HttpConfig, ServiceAccountConfig, SheetColumn};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, JsonRequest};
use crate::types::{cell_to_text, CuratedBatch};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

/// Query parameters of every append request
pub const APPEND_PARAMS: [(&str, &str); 2] = [
    ("valueInputOption", "USER_ENTERED"),
    ("insertDataOption", "INSERT_ROWS"),
];

/// Appends rows through `/v4/spreadsheets/{id}/values/{range}:append`
#[derive(Debug)]
pub struct SheetsAppendSink {
    append_url: String,
    range_url: String,
    columns: Vec<SheetColumn>,
    client: HttpClient,
    /// Set once the range is known to start with a header row; held for the
    /// whole append
    headed: Mutex<bool>,
}

impl SheetsAppendSink {
    /// Create a sink with explicit auth
    pub fn new(
        base_url: &str,
        spreadsheet_id: &str,
        range: &str,
        columns: Vec<SheetColumn>,
        auth: AuthConfig,
        http: &HttpConfig,
    ) -> Result<Self> {
        let append_url = values_url(base_url, spreadsheet_id, &format!("{range}:append"))?;
        let range_url = values_url(base_url, spreadsheet_id, range)?;
        let client = HttpClient::with_auth(HttpClientConfig::from_pipeline(http), auth)?;
        Ok(Self {
            append_url,
            range_url,
            columns,
            client,
            headed: Mutex::new(false),
        })
    }

    /// Create a sink authenticated as a service account
    pub fn from_service_account(
        base_url: &str,
        spreadsheet_id: &str,
        range: &str,
        columns: Vec<SheetColumn>,
        credentials: &ServiceAccountConfig,
        http: &HttpConfig,
    ) -> Result<Self> {
        let key = ServiceAccountKey::from_config(credentials)?;
        Self::new(
            base_url,
            spreadsheet_id,
            range,
            columns,
            key.auth_config(&credentials.scopes),
            http,
        )
    }

    /// Fully-qualified append endpoint
    pub fn append_url(&self) -> &str {
        &self.append_url
    }

    /// Header row for `batch`
    fn header(&self, batch: &CuratedBatch) -> Vec<String> {
        if self.columns.is_empty() {
            return batch.columns.clone();
        }
        self.columns.iter().map(|c| c.header.clone()).collect()
    }

    /// Rows in sheet column order; a column missing from the batch is blank
    fn project(&self, dataset: &str, batch: &CuratedBatch) -> Vec<Vec<String>> {
        if self.columns.is_empty() {
            return rows_as_text(batch);
        }

        let positions: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| batch.columns.iter().position(|name| *name == c.column))
            .collect();
        for (column, position) in self.columns.iter().zip(&positions) {
            if position.is_none() {
                tracing::warn!(
                    dataset,
                    column = %column.column,
                    "Sheet column not in batch, left blank"
                );
            }
        }

        batch
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|position| {
                        position
                            .and_then(|i| row.values.get(i))
                            .map(cell_to_text)
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }

    /// Check whether the configured range has no values yet
    async fn range_is_empty(&self) -> Result<bool> {
        let response = self.client.send(&JsonRequest::get(&self.range_url)).await?;
        let range: ValueRange = response.json().await?;
        Ok(range
            .values
            .iter()
            .all(|row| row.iter().all(|cell| cell.as_str() == Some(""))))
    }
}

/// Body of a values read; `values` is omitted for an empty range
#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn values_url(base_url: &str, spreadsheet_id: &str, target: &str) -> Result<String> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|()| Error::config(format!("'{base_url}' cannot be a base URL")))?
        .pop_if_empty()
        .extend(["v4", "spreadsheets", spreadsheet_id, "values", target]);
    Ok(url.to_string())
}

#[async_trait]
impl TabularSink for SheetsAppendSink {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn append(&self, dataset: &str, batch: &CuratedBatch) -> Result<()> {
        let mut headed = self.headed.lock().await;

        let mut values = Vec::with_capacity(batch.len() + 1);
        let with_header = !*headed && self.range_is_empty().await?;
        if with_header {
            values.push(self.header(batch));
        }
        values.extend(self.project(dataset, batch));

        let body = json!({
            "majorDimension": "ROWS",
            "values": values,
        });
        let request = APPEND_PARAMS
            .iter()
            .fold(JsonRequest::post(&self.append_url, body), |req, (key, value)| {
                req.query(*key, *value)
            });

        self.client.send(&request).await?;
        *headed = true;
        tracing::debug!(
            dataset,
            rows = batch.len(),
            with_header,
            "Appended rows to spreadsheet"
        );
        Ok(())
    }
}
