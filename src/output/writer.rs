//! In-memory Parquet encoding of snapshots
//!
//! The manifest hash is taken over the encoded bytes, so every setting that
//! affects the bytes is fixed here and nothing time- or host-dependent is
//! written into the file metadata.

use crate::error::{Error, Result};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{WriterProperties, WriterVersion};

/// Row group and codec choices for snapshot files
#[derive(Debug, Clone, PartialEq)]
struct ParquetWriterConfig {
    compression: Compression,
    row_group_size: usize,
    dictionary: bool,
}

impl Default for ParquetWriterConfig {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: 64 * 1024,
            dictionary: true,
        }
    }
}

impl ParquetWriterConfig {
    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_1_0)
            .set_created_by(format!("{} {}", crate::NAME, crate::VERSION))
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .set_dictionary_enabled(self.dictionary)
            .build()
    }
}

/// Encode `batch` as a complete Parquet file
pub fn write_parquet_bytes(batch: &RecordBatch) -> Result<Vec<u8>> {
    let properties = ParquetWriterConfig::default().properties();
    let encode = |stage: &str, e: parquet::errors::ParquetError| {
        Error::output(format!("Parquet {stage} failed for {} rows: {e}", batch.num_rows()))
    };

    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), Some(properties))
        .map_err(|e| encode("setup", e))?;
    writer.write(batch).map_err(|e| encode("encoding", e))?;
    writer.into_inner().map_err(|e| encode("footer", e))
}
