//! Tests for output module

use super::*;
use crate::config::SnapshotFormat;
use crate::types::{epoch, CuratedBatch, CuratedRow, RowKey};
use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn batch(columns: &[&str], rows: Vec<Vec<Value>>) -> CuratedBatch {
    CuratedBatch {
        columns: columns.iter().map(|c| (*c).to_string()).collect(),
        rows: rows
            .into_iter()
            .enumerate()
            .map(|(i, values)| CuratedRow {
                key: RowKey::new(epoch(), i.to_string()),
                values,
            })
            .collect(),
    }
}

// ============================================================================
// Schema Inference Tests
// ============================================================================

#[test]
fn test_infer_schema_narrows_types() {
    let b = batch(
        &["id", "amount", "ratio", "flag", "note", "empty"],
        vec![
            vec![json!(1), json!(10), json!(0.5), json!(true), json!("a"), Value::Null],
            vec![json!(2), json!(2.5), Value::Null, json!(false), json!(3), Value::Null],
        ],
    );

    let schema = infer_schema(&b);
    let types: Vec<_> = schema.fields().iter().map(|f| f.data_type().clone()).collect();
    assert_eq!(
        types,
        vec![
            DataType::Int64,
            DataType::Float64,
            DataType::Float64,
            DataType::Boolean,
            DataType::Utf8,
            DataType::Utf8,
        ]
    );
}

#[test]
fn test_infer_schema_keeps_column_order() {
    let b = batch(&["z", "a", "m"], vec![]);
    let names: Vec<_> = infer_schema(&b)
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names, vec!["z", "a", "m"]);
}

#[test]
fn test_batch_to_arrow() {
    let b = batch(
        &["id", "amount", "note"],
        vec![
            vec![json!(1), json!(1.5), json!("x")],
            vec![json!(2), Value::Null, json!(7)],
        ],
    );

    let record_batch = batch_to_arrow(&b).unwrap();
    assert_eq!(record_batch.num_rows(), 2);

    let ids = record_batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(ids.value(1), 2);

    let amounts = record_batch
        .column(1)
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert!(amounts.is_null(1));

    let notes = record_batch
        .column(2)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(notes.value(1), "7");
}

// ============================================================================
// Serialization Tests
// ============================================================================

#[test]
fn test_serialize_csv() {
    let b = batch(
        &["id", "note"],
        vec![
            vec![json!("1"), json!("hello, world")],
            vec![json!("2"), Value::Null],
        ],
    );

    let bytes = serialize_batch(&b, SnapshotFormat::Csv).unwrap();
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        "id,note\n1,\"hello, world\"\n2,\n"
    );
}

#[test]
fn test_serialize_csv_empty_batch_has_header() {
    let b = batch(&["id", "note"], vec![]);
    let bytes = serialize_batch(&b, SnapshotFormat::Csv).unwrap();
    assert_eq!(String::from_utf8(bytes).unwrap(), "id,note\n");
}

#[test]
fn test_write_csv_without_header() {
    let b = batch(&["id"], vec![vec![json!("1")]]);
    let mut buf = Vec::new();
    write_csv(&mut buf, &b, false).unwrap();
    assert_eq!(buf, b"1\n");
}

#[test]
fn test_serialize_parquet_readable() {
    let b = batch(
        &["id", "note"],
        vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
    );

    let bytes = serialize_batch(&b, SnapshotFormat::Parquet).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
        .unwrap()
        .build()
        .unwrap();
    let total: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
    assert_eq!(total, 2);
}

#[test]
fn test_serialization_is_deterministic() {
    let b = batch(
        &["id", "note"],
        vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
    );

    for format in [SnapshotFormat::Csv, SnapshotFormat::Parquet] {
        let first = serialize_batch(&b, format).unwrap();
        let second = serialize_batch(&b, format).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn test_parquet_writer_settings() {
    let b = batch(&["id"], (0..25).map(|i| vec![json!(i)]).collect());
    let bytes = write_parquet_bytes(&batch_to_arrow(&b).unwrap()).unwrap();
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes)).unwrap();
    let metadata = builder.metadata();

    assert_eq!(metadata.num_row_groups(), 1);
    assert_eq!(
        metadata.row_group(0).column(0).compression(),
        parquet::basic::Compression::SNAPPY
    );
    assert!(metadata
        .file_metadata()
        .created_by()
        .is_some_and(|by| by.starts_with("dropledger ")));
}
