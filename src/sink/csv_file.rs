//! Local CSV append sink

use super::TabularSink;
use crate::error::{Error, Result};
use crate::output::write_csv;
use crate::types::CuratedBatch;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appends rows to a CSV file, writing the header when the file is new.
///
/// Each append is flushed and fsync'd before it is acknowledged.
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    path: PathBuf,
}

impl CsvFileSink {
    /// Create a sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_blocking(path: &Path, batch: &CuratedBatch) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        let is_new = file.metadata().map_err(|e| Error::io(path, e))?.len() == 0;

        let mut buf = Vec::new();
        write_csv(&mut buf, batch, is_new)?;
        file.write_all(&buf).map_err(|e| Error::io(path, e))?;
        file.sync_all().map_err(|e| Error::io(path, e))?;
        Ok(())
    }
}

#[async_trait]
impl TabularSink for CsvFileSink {
    fn name(&self) -> &str {
        "csv_file"
    }

    async fn append(&self, dataset: &str, batch: &CuratedBatch) -> Result<()> {
        let path = self.path.clone();
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || Self::append_blocking(&path, &batch))
            .await
            .map_err(Error::task)??;
        tracing::debug!(dataset, path = %self.path.display(), "Appended rows to CSV");
        Ok(())
    }
}
