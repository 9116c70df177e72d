//! Snapshot serialization

use crate::config::SnapshotFormat;
use crate::error::Result;
use crate::output::schema::batch_to_arrow;
use crate::output::writer::write_parquet_bytes;
use crate::types::{cell_to_text, CuratedBatch};
use std::io::Write;

/// Serialize a batch in the given format.
///
/// The output depends only on the batch contents, so sorting the batch first
/// gives byte-identical snapshots for identical data.
pub fn serialize_batch(batch: &CuratedBatch, format: SnapshotFormat) -> Result<Vec<u8>> {
    match format {
        SnapshotFormat::Csv => {
            let mut buf = Vec::new();
            write_csv(&mut buf, batch, true)?;
            Ok(buf)
        }
        SnapshotFormat::Parquet => {
            let record_batch = batch_to_arrow(batch)?;
            write_parquet_bytes(&record_batch)
        }
    }
}

/// Write a batch as CSV, optionally preceded by a header row
pub fn write_csv<W: Write>(out: W, batch: &CuratedBatch, header: bool) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);

    if header {
        writer.write_record(&batch.columns)?;
    }
    for row in &batch.rows {
        writer.write_record(row.values.iter().map(cell_to_text))?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}
