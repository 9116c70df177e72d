//! Reads curated tables in export order

use crate::config::DatasetConfig;
use crate::error::{Error, Result};
use crate::types::{format_sql_timestamp, parse_timestamp, CuratedBatch, CuratedRow, RowKey};
use crate::warehouse::{quote_ident, select_values, table_columns, table_exists, TableName};
use duckdb::{Connection, Params};

/// Query over a curated table, ordered by `(ts, id)`.
///
/// Rows with a NULL timestamp or id have no export position and are skipped.
#[derive(Debug, Clone)]
pub struct CuratedQuery {
    table: TableName,
    ts_column: String,
    id_column: String,
}

impl CuratedQuery {
    /// Build the query for a configured dataset
    pub fn for_dataset(dataset: &DatasetConfig) -> Result<Self> {
        Ok(Self {
            table: dataset.table_name()?,
            ts_column: dataset.ts_column.clone(),
            id_column: dataset.id_column.clone(),
        })
    }

    /// Every curated row
    pub fn select_all(&self, conn: &Connection) -> Result<CuratedBatch> {
        self.run(conn, "", [])
    }

    /// Rows strictly after `after`
    pub fn select_after(&self, conn: &Connection, after: &RowKey) -> Result<CuratedBatch> {
        let ts = format_sql_timestamp(&after.ts);
        let filter = format!(
            " AND ({ts_expr} > CAST(? AS TIMESTAMP) OR ({ts_expr} = CAST(? AS TIMESTAMP) AND {id_expr} > ?))",
            ts_expr = self.ts_expr(),
            id_expr = self.id_expr(),
        );
        self.run(conn, &filter, duckdb::params![ts, ts, after.id])
    }

    fn ts_expr(&self) -> String {
        format!("CAST({} AS TIMESTAMP)", quote_ident(&self.ts_column))
    }

    fn id_expr(&self) -> String {
        format!("CAST({} AS VARCHAR)", quote_ident(&self.id_column))
    }

    fn run<P: Params>(&self, conn: &Connection, filter: &str, params: P) -> Result<CuratedBatch> {
        if !table_exists(conn, &self.table)? {
            return Err(Error::warehouse(format!(
                "curated table {} does not exist",
                self.table
            )));
        }

        let columns = table_columns(conn, &self.table)?;
        for required in [&self.ts_column, &self.id_column] {
            if !columns.contains(required) {
                return Err(Error::config(format!(
                    "curated table {} has no column '{required}'",
                    self.table
                )));
            }
        }

        let ts_expr = self.ts_expr();
        let id_expr = self.id_expr();
        let sql = format!(
            "SELECT CAST({ts_expr} AS VARCHAR), {id_expr}, * FROM {table} \
             WHERE {ts_expr} IS NOT NULL AND {id_expr} IS NOT NULL{filter} \
             ORDER BY {ts_expr}, {id_expr}",
            table = self.table.quoted(),
        );

        let rows = select_values(conn, &sql, params, columns.len() + 2)?;
        let mut batch = CuratedBatch::new(columns);
        for mut values in rows {
            let key = row_key(&values[0], &values[1])?;
            values.drain(..2);
            batch.rows.push(CuratedRow { key, values });
        }
        Ok(batch)
    }
}

fn row_key(ts: &serde_json::Value, id: &serde_json::Value) -> Result<RowKey> {
    let ts = ts
        .as_str()
        .ok_or_else(|| Error::warehouse(format!("unexpected timestamp value {ts}")))?;
    let id = id
        .as_str()
        .ok_or_else(|| Error::warehouse(format!("unexpected id value {id}")))?;
    Ok(RowKey::new(parse_timestamp(ts)?, id))
}
