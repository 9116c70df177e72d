//! Common types used throughout dropledger
//!
//! Row ordering keys, curated batches and the timestamp formats shared by the
//! warehouse, the exporters and the sinks.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

// ============================================================================
// Timestamps
// ============================================================================

/// Format used when binding timestamps into SQL and storing watermarks
pub const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Parse a timestamp as it comes back from the warehouse or from an operator.
///
/// Accepts `YYYY-MM-DD HH:MM:SS[.fff]`, the `T`-separated ISO form, an
/// RFC 3339 string with an offset (converted to UTC) and a bare date.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.naive_utc());
    }

    // DuckDB renders TIMESTAMPTZ as "2024-01-01 10:00:00+00"
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(ts.naive_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }

    Err(Error::invalid_value(
        "timestamp",
        format!("cannot parse '{value}' as a timestamp"),
    ))
}

/// Render a timestamp in the form bound into `CAST(? AS TIMESTAMP)`
pub fn format_sql_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(SQL_TIMESTAMP_FORMAT).to_string()
}

/// The minimum watermark timestamp, `1970-01-01 00:00:00`
pub fn epoch() -> NaiveDateTime {
    DateTime::<Utc>::UNIX_EPOCH.naive_utc()
}

// ============================================================================
// Row Keys
// ============================================================================

/// Position of a curated row in the export order.
///
/// Ordering is lexicographic: event timestamp first, surrogate id second.
/// Field order matters for the derived `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    /// Event timestamp
    pub ts: NaiveDateTime,
    /// Surrogate id, compared as a string
    pub id: String,
}

impl RowKey {
    /// Create a new row key
    pub fn new(ts: NaiveDateTime, id: impl Into<String>) -> Self {
        Self { ts, id: id.into() }
    }

    /// The sentinel position that sorts before every real row
    pub fn min() -> Self {
        Self {
            ts: epoch(),
            id: String::new(),
        }
    }

    /// Check if this is the sentinel position
    pub fn is_min(&self) -> bool {
        *self == Self::min()
    }
}

impl Default for RowKey {
    fn default() -> Self {
        Self::min()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", format_sql_timestamp(&self.ts), self.id)
    }
}

// ============================================================================
// Curated Rows
// ============================================================================

/// One row of a curated dataset
#[derive(Debug, Clone, PartialEq)]
pub struct CuratedRow {
    /// Ordering key extracted from the configured ts/id columns
    pub key: RowKey,
    /// Cell values, aligned with `CuratedBatch::columns`
    pub values: Vec<JsonValue>,
}

/// A set of curated rows sharing one column list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CuratedBatch {
    /// Column names in table order
    pub columns: Vec<String>,
    /// Rows, in the order the warehouse returned them
    pub rows: Vec<CuratedRow>,
}

impl CuratedBatch {
    /// Create an empty batch with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Key of the last row, if any
    pub fn last_key(&self) -> Option<&RowKey> {
        self.rows.last().map(|row| &row.key)
    }

    /// Sort rows by key; rows with equal keys are ordered by their serialized
    /// values so the result does not depend on the warehouse scan order.
    pub fn sort_deterministic(&mut self) {
        self.rows.sort_by(|a, b| {
            a.key.cmp(&b.key).then_with(|| {
                let left = serde_json::to_string(&a.values).unwrap_or_default();
                let right = serde_json::to_string(&b.values).unwrap_or_default();
                left.cmp(&right)
            })
        });
    }

    /// Split into consecutive batches of at most `size` rows
    pub fn chunks(&self, size: usize) -> Vec<CuratedBatch> {
        if size == 0 || self.rows.len() <= size {
            return vec![self.clone()];
        }
        self.rows
            .chunks(size)
            .map(|rows| CuratedBatch {
                columns: self.columns.clone(),
                rows: rows.to_vec(),
            })
            .collect()
    }
}

/// Render a cell as text for sinks: NULL is empty, strings are unquoted,
/// everything else uses its JSON form.
pub fn cell_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
