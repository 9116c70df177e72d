//! Generic HTTP append sink

use super::{rows_as_text, TabularSink};
use crate::auth::AuthConfig;
use crate::config::HttpConfig;
use crate::error::Result;
use crate::http::{HttpClient, HttpClientConfig};
use crate::types::CuratedBatch;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;

/// POSTs each batch as `{"dataset": .., "columns": [..], "rows": [[..]]}`
#[derive(Debug)]
pub struct HttpAppendSink {
    url: String,
    client: HttpClient,
}

impl HttpAppendSink {
    /// Create a sink for an endpoint
    pub fn new(
        url: &str,
        auth: AuthConfig,
        headers: &HashMap<String, String>,
        http: &HttpConfig,
    ) -> Result<Self> {
        url::Url::parse(url)?;

        let config = headers
            .iter()
            .fold(HttpClientConfig::from_pipeline(http), |config, (name, value)| {
                config.with_header(name, value)
            });

        Ok(Self {
            url: url.to_string(),
            client: HttpClient::with_auth(config, auth)?,
        })
    }
}

#[async_trait]
impl TabularSink for HttpAppendSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn append(&self, dataset: &str, batch: &CuratedBatch) -> Result<()> {
        let body = json!({
            "dataset": dataset,
            "columns": batch.columns,
            "rows": rows_as_text(batch),
        });
        self.client.post_json(&self.url, body).await?;
        tracing::debug!(dataset, rows = batch.len(), url = %self.url, "Appended rows");
        Ok(())
    }
}
