//! Arrow schema inference for curated batches
//!
//! Column types are narrowed from the JSON cells: Int64, Float64 or Boolean
//! when every non-null cell agrees, Utf8 otherwise.

use crate::error::{Error, Result};
use crate::types::{CuratedBatch, JsonValue};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Infer an Arrow schema for a curated batch, keeping column order
pub fn infer_schema(batch: &CuratedBatch) -> Schema {
    let fields: Vec<Field> = batch
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let dtype = batch
                .rows
                .iter()
                .filter_map(|row| row.values.get(idx))
                .map(infer_type)
                .fold(DataType::Null, |acc, t| merge_types(&acc, &t));
            let dtype = if dtype == DataType::Null {
                DataType::Utf8
            } else {
                dtype
            };
            Field::new(name, dtype, true)
        })
        .collect();

    Schema::new(fields)
}

/// Convert a curated batch to an Arrow RecordBatch
pub fn batch_to_arrow(batch: &CuratedBatch) -> Result<RecordBatch> {
    let schema = Arc::new(infer_schema(batch));

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.columns.len());
    for (idx, field) in schema.fields().iter().enumerate() {
        let values: Vec<Option<&JsonValue>> = batch
            .rows
            .iter()
            .map(|row| row.values.get(idx).filter(|v| !v.is_null()))
            .collect();
        columns.push(build_array(&values, field.data_type()));
    }

    RecordBatch::try_new(schema, columns).map_err(|e| {
        Error::output(format!(
            "{} curated rows do not fit the inferred schema: {e}",
            batch.rows.len()
        ))
    })
}

fn infer_type(value: &JsonValue) -> DataType {
    match value {
        JsonValue::Null => DataType::Null,
        JsonValue::Bool(_) => DataType::Boolean,
        JsonValue::Number(n) if n.is_i64() => DataType::Int64,
        JsonValue::Number(_) => DataType::Float64,
        _ => DataType::Utf8,
    }
}

/// Merge two data types into a compatible type
fn merge_types(type1: &DataType, type2: &DataType) -> DataType {
    match (type1, type2) {
        (a, b) if a == b => a.clone(),

        // Null can merge with anything
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),

        (DataType::Int64, DataType::Float64) | (DataType::Float64, DataType::Int64) => {
            DataType::Float64
        }

        _ => DataType::Utf8,
    }
}

fn build_array(values: &[Option<&JsonValue>], data_type: &DataType) -> ArrayRef {
    match data_type {
        DataType::Boolean => {
            let arr: BooleanArray = values
                .iter()
                .map(|v| v.and_then(JsonValue::as_bool))
                .collect();
            Arc::new(arr)
        }

        DataType::Int64 => {
            let arr: Int64Array = values.iter().map(|v| v.and_then(JsonValue::as_i64)).collect();
            Arc::new(arr)
        }

        DataType::Float64 => {
            let arr: Float64Array = values.iter().map(|v| v.and_then(JsonValue::as_f64)).collect();
            Arc::new(arr)
        }

        _ => {
            let arr: StringArray = values
                .iter()
                .map(|v| v.map(crate::types::cell_to_text))
                .collect();
            Arc::new(arr)
        }
    }
}
