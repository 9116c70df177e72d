//! Watermark store implementation
//!
//! Watermarks only move forward. An advance reads the current value and
//! writes the new one inside a single transaction.

use super::types::Watermark;
use crate::error::{Error, Result};
use crate::types::{format_sql_timestamp, parse_timestamp, RowKey};
use crate::warehouse::{quote_ident, Warehouse, META_SCHEMA, WATERMARK_TABLE};
use chrono::Utc;
use duckdb::{Connection, OptionalExt};
use std::sync::Arc;

/// Durable, monotonic export watermarks
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    warehouse: Arc<Warehouse>,
}

impl WatermarkStore {
    /// Create a store over a warehouse
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Current watermark, or the sentinel if the dataset was never exported
    pub fn read(&self, dataset: &str) -> Result<Watermark> {
        self.warehouse.with_conn(|conn| read_in(conn, dataset))
    }

    /// Move the watermark to `key`.
    ///
    /// Fails with `NonMonotonic` if `key` is below the stored position.
    /// Advancing to the same position is allowed.
    pub fn advance(&self, dataset: &str, key: &RowKey) -> Result<Watermark> {
        let watermark = self.warehouse.transaction(|conn| {
            let current = read_in(conn, dataset)?;
            if *key < current.key() {
                return Err(Error::NonMonotonic {
                    dataset: dataset.to_string(),
                    current_ts: format_sql_timestamp(&current.last_ts),
                    current_id: current.last_id,
                    new_ts: format_sql_timestamp(&key.ts),
                    new_id: key.id.clone(),
                });
            }

            let updated_at = Utc::now().naive_utc();
            conn.execute(
                &format!(
                    "INSERT INTO {} (dataset, last_ts, last_id, updated_at) \
                     VALUES (?, CAST(? AS TIMESTAMP), ?, CAST(? AS TIMESTAMP)) \
                     ON CONFLICT (dataset) DO UPDATE SET \
                     last_ts = excluded.last_ts, \
                     last_id = excluded.last_id, \
                     updated_at = excluded.updated_at",
                    watermark_table()
                ),
                duckdb::params![
                    dataset,
                    format_sql_timestamp(&key.ts),
                    key.id,
                    format_sql_timestamp(&updated_at),
                ],
            )?;

            Ok(Watermark {
                dataset: dataset.to_string(),
                last_ts: key.ts,
                last_id: key.id.clone(),
                updated_at: Some(updated_at),
            })
        });

        match &watermark {
            Ok(wm) => {
                tracing::debug!(dataset, position = %wm.key(), "Advanced watermark");
            }
            Err(e @ Error::NonMonotonic { .. }) => {
                tracing::error!(dataset, error = %e, "Refused to move watermark backwards");
            }
            Err(_) => {}
        }

        watermark
    }

    /// All stored watermarks, ordered by dataset
    pub fn list(&self) -> Result<Vec<Watermark>> {
        self.warehouse.with_conn(|conn| {
            let sql = format!("{} ORDER BY dataset", select_sql());
            let mut stmt = conn.prepare(&sql)?;
            let raw = stmt
                .query_map([], raw_watermark)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            raw.into_iter().map(RawWatermark::into_watermark).collect()
        })
    }

    /// Delete a dataset's watermark (operator action); the next incremental
    /// export starts from the sentinel and redelivers everything.
    pub fn reset(&self, dataset: &str) -> Result<bool> {
        let deleted = self.warehouse.transaction(|conn| {
            let n = conn.execute(
                &format!("DELETE FROM {} WHERE dataset = ?", watermark_table()),
                [dataset],
            )?;
            Ok(n)
        })?;
        if deleted > 0 {
            tracing::warn!(dataset, "Reset watermark; next export redelivers all rows");
        }
        Ok(deleted > 0)
    }
}

fn watermark_table() -> String {
    format!("{}.{}", quote_ident(META_SCHEMA), quote_ident(WATERMARK_TABLE))
}

fn select_sql() -> String {
    format!(
        "SELECT dataset, CAST(last_ts AS VARCHAR), last_id, CAST(updated_at AS VARCHAR) FROM {}",
        watermark_table()
    )
}

struct RawWatermark {
    dataset: String,
    last_ts: String,
    last_id: String,
    updated_at: Option<String>,
}

impl RawWatermark {
    fn into_watermark(self) -> Result<Watermark> {
        Ok(Watermark {
            dataset: self.dataset,
            last_ts: parse_timestamp(&self.last_ts)?,
            last_id: self.last_id,
            updated_at: self
                .updated_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

fn raw_watermark(row: &duckdb::Row<'_>) -> duckdb::Result<RawWatermark> {
    Ok(RawWatermark {
        dataset: row.get(0)?,
        last_ts: row.get(1)?,
        last_id: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn read_in(conn: &Connection, dataset: &str) -> Result<Watermark> {
    let sql = format!("{} WHERE dataset = ?", select_sql());
    let raw = conn.query_row(&sql, [dataset], raw_watermark).optional()?;
    match raw {
        Some(raw) => raw.into_watermark(),
        None => Ok(Watermark::sentinel(dataset)),
    }
}
