//! DuckDB warehouse handle

use crate::error::{Error, Result};
use crate::types::JsonValue;
use crate::warehouse::values::{duckdb_value_to_json, quote_ident, TableName};
use duckdb::{Connection, Params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Schema holding ledger and watermark tables
pub const META_SCHEMA: &str = "meta";

/// Schema holding staged (raw) tables
pub const RAW_SCHEMA: &str = "raw";

/// Ingestion ledger table name (inside `META_SCHEMA`)
pub const LEDGER_TABLE: &str = "ingest_ledger";

/// Export watermark table name (inside `META_SCHEMA`)
pub const WATERMARK_TABLE: &str = "export_watermark";

/// Handle to the DuckDB warehouse.
///
/// The connection can be detached so an external process (a transformation
/// command) can open the file, then reattached afterwards. An in-memory
/// warehouse ignores detach requests since closing it would drop its data.
pub struct Warehouse {
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl Warehouse {
    /// Open (or create) a warehouse file and bootstrap the meta tables
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| {
            Error::warehouse(format!("Failed to open warehouse {}: {e}", path.display()))
        })?;
        bootstrap(&conn)?;

        tracing::debug!(path = %path.display(), "Opened warehouse");

        Ok(Self {
            path: Some(path),
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Open an in-memory warehouse
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::warehouse(format!("Failed to create DuckDB connection: {e}")))?;
        bootstrap(&conn)?;

        Ok(Self {
            path: None,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Path of the warehouse file, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| Error::warehouse("warehouse connection lock poisoned"))
    }

    /// Run a closure against the open connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::warehouse("warehouse is detached"))?;
        f(conn)
    }

    /// Run a closure inside one transaction.
    ///
    /// The transaction commits only if the closure returns `Ok`; on error
    /// (or panic) it is dropped, which rolls it back.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::warehouse("warehouse is detached"))?;

        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Close the connection so another process can open the file
    pub fn detach(&self) -> Result<()> {
        if self.path.is_none() {
            return Ok(());
        }
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| Error::warehouse(format!("Failed to close warehouse: {e}")))?;
            tracing::debug!("Detached warehouse");
        }
        Ok(())
    }

    /// Reopen the connection after `detach`
    pub fn reattach(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut guard = self.lock()?;
        if guard.is_none() {
            let conn = Connection::open(path).map_err(|e| {
                Error::warehouse(format!("Failed to reopen warehouse {}: {e}", path.display()))
            })?;
            *guard = Some(conn);
            tracing::debug!("Reattached warehouse");
        }
        Ok(())
    }

    /// Check whether the warehouse connection is open
    pub fn is_attached(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Run a batch of SQL statements
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(sql)?;
            Ok(())
        })
    }

    /// Check whether a table exists
    pub fn table_exists(&self, table: &TableName) -> Result<bool> {
        self.with_conn(|conn| table_exists(conn, table))
    }

    /// Column names of a table, in table order
    pub fn table_columns(&self, table: &TableName) -> Result<Vec<String>> {
        self.with_conn(|conn| table_columns(conn, table))
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &TableName) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table.quoted()),
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Run a query and return its columns and rows as JSON values
    pub fn query_json(&self, sql: &str) -> Result<(Vec<String>, Vec<Vec<JsonValue>>)> {
        self.with_conn(|conn| {
            let columns = describe(conn, sql)?;
            let rows = select_values(conn, sql, [], columns.len())?;
            Ok((columns, rows))
        })
    }
}

impl std::fmt::Debug for Warehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warehouse")
            .field("path", &self.path)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Create the meta and raw schemas plus bookkeeping tables
fn bootstrap(conn: &Connection) -> Result<()> {
    let meta = quote_ident(META_SCHEMA);
    let raw = quote_ident(RAW_SCHEMA);
    let ledger = quote_ident(LEDGER_TABLE);
    let watermark = quote_ident(WATERMARK_TABLE);

    conn.execute_batch(&format!(
        "CREATE SCHEMA IF NOT EXISTS {meta};
         CREATE SCHEMA IF NOT EXISTS {raw};
         CREATE TABLE IF NOT EXISTS {meta}.{ledger} (
             filename VARCHAR PRIMARY KEY,
             size BIGINT NOT NULL,
             content_hash VARCHAR NOT NULL,
             ingested_at TIMESTAMP NOT NULL,
             source VARCHAR,
             target_table VARCHAR
         );
         CREATE TABLE IF NOT EXISTS {meta}.{watermark} (
             dataset VARCHAR PRIMARY KEY,
             last_ts TIMESTAMP NOT NULL,
             last_id VARCHAR NOT NULL,
             updated_at TIMESTAMP NOT NULL
         );"
    ))
    .map_err(|e| Error::warehouse(format!("Failed to bootstrap warehouse schema: {e}")))?;

    Ok(())
}

/// Check whether a table exists, using an open connection
pub(crate) fn table_exists(conn: &Connection, table: &TableName) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
        [table.schema_or_default(), table.name.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Column names of a table, using an open connection
pub(crate) fn table_columns(conn: &Connection, table: &TableName) -> Result<Vec<String>> {
    describe(conn, &format!("SELECT * FROM {}", table.quoted()))
}

/// Column names a query would produce
pub(crate) fn describe(conn: &Connection, sql: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("DESCRIBE {sql}"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Run a query and convert the first `width` columns of every row to JSON
pub(crate) fn select_values<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    width: usize,
) -> Result<Vec<Vec<JsonValue>>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            let value: duckdb::types::Value = row.get(i)?;
            values.push(duckdb_value_to_json(value));
        }
        out.push(values);
    }
    Ok(out)
}
