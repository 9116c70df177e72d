//! Ingestion ledger
//!
//! The ledger (`meta.ingest_ledger`) remembers every file that has been
//! staged, keyed by its drop-zone-relative path. Entries are written in the
//! same transaction as the staged rows and are never updated.

use super::fingerprint::Fingerprint;
use crate::error::{Error, Result};
use crate::types::{format_sql_timestamp, parse_timestamp};
use crate::warehouse::{quote_ident, Warehouse, LEDGER_TABLE, META_SCHEMA};
use chrono::NaiveDateTime;
use duckdb::{Connection, OptionalExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One ingested file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Drop-zone-relative POSIX path
    pub filename: String,
    /// Size in bytes at ingestion time
    pub size: u64,
    /// SHA-256 hex of the content at ingestion time
    pub content_hash: String,
    /// When the load transaction ran (UTC)
    pub ingested_at: NaiveDateTime,
    /// Route prefix the file matched
    #[serde(default)]
    pub source: Option<String>,
    /// Staged table the rows went to
    #[serde(default)]
    pub target_table: Option<String>,
}

impl LedgerEntry {
    /// Check whether this entry describes the same content
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.size == fingerprint.size && self.content_hash == fingerprint.content_hash
    }
}

/// What to do with a fingerprinted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerDecision {
    /// Not seen before
    Ingest,
    /// Same path, same content: already staged
    Skip(LedgerEntry),
    /// Same path, different content
    Conflict(LedgerEntry),
}

impl LedgerDecision {
    /// Decide from an existing entry (if any) and the current fingerprint
    pub fn from_lookup(existing: Option<LedgerEntry>, fingerprint: &Fingerprint) -> Self {
        match existing {
            None => Self::Ingest,
            Some(entry) if entry.matches(fingerprint) => Self::Skip(entry),
            Some(entry) => Self::Conflict(entry),
        }
    }

    /// Turn the decision into the error raised for a conflicting re-drop
    pub fn conflict_error(entry: &LedgerEntry, fingerprint: &Fingerprint) -> Error {
        Error::ConflictingReDrop {
            filename: entry.filename.clone(),
            recorded_size: entry.size,
            recorded_hash: entry.content_hash.clone(),
            size: fingerprint.size,
            content_hash: fingerprint.content_hash.clone(),
        }
    }
}

/// Durable ledger of ingested files
#[derive(Debug, Clone)]
pub struct IngestLedger {
    warehouse: Arc<Warehouse>,
}

impl IngestLedger {
    /// Create a ledger over a warehouse
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Look up an entry by filename
    pub fn lookup(&self, filename: &str) -> Result<Option<LedgerEntry>> {
        self.warehouse.with_conn(|conn| lookup_in(conn, filename))
    }

    /// Record a new entry in its own transaction
    pub fn record(&self, entry: &LedgerEntry) -> Result<()> {
        self.warehouse.transaction(|conn| record_in(conn, entry))
    }

    /// Three-way decision for a fingerprinted file
    pub fn decide(&self, filename: &str, fingerprint: &Fingerprint) -> Result<LedgerDecision> {
        Ok(LedgerDecision::from_lookup(
            self.lookup(filename)?,
            fingerprint,
        ))
    }

    /// All entries, ordered by filename
    pub fn list(&self) -> Result<Vec<LedgerEntry>> {
        self.warehouse.with_conn(|conn| {
            let sql = format!("{} ORDER BY filename", select_sql());
            let mut stmt = conn.prepare(&sql)?;
            let raw = stmt
                .query_map([], raw_entry)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            raw.into_iter().map(RawEntry::into_entry).collect()
        })
    }

    /// Delete an entry so the file will be ingested again (operator action).
    ///
    /// Staged rows from the earlier load are left in place.
    pub fn forget(&self, filename: &str) -> Result<bool> {
        let deleted = self.warehouse.transaction(|conn| {
            let n = conn.execute(
                &format!("DELETE FROM {} WHERE filename = ?", ledger_table()),
                [filename],
            )?;
            Ok(n)
        })?;
        if deleted > 0 {
            tracing::warn!(filename, "Removed ledger entry; file will be re-ingested");
        }
        Ok(deleted > 0)
    }
}

fn ledger_table() -> String {
    format!("{}.{}", quote_ident(META_SCHEMA), quote_ident(LEDGER_TABLE))
}

fn select_sql() -> String {
    format!(
        "SELECT filename, size, content_hash, CAST(ingested_at AS VARCHAR), source, target_table \
         FROM {}",
        ledger_table()
    )
}

/// Row as read from DuckDB, before timestamp parsing
struct RawEntry {
    filename: String,
    size: i64,
    content_hash: String,
    ingested_at: String,
    source: Option<String>,
    target_table: Option<String>,
}

impl RawEntry {
    fn into_entry(self) -> Result<LedgerEntry> {
        Ok(LedgerEntry {
            filename: self.filename,
            size: self.size as u64,
            content_hash: self.content_hash,
            ingested_at: parse_timestamp(&self.ingested_at)?,
            source: self.source,
            target_table: self.target_table,
        })
    }
}

fn raw_entry(row: &duckdb::Row<'_>) -> duckdb::Result<RawEntry> {
    Ok(RawEntry {
        filename: row.get(0)?,
        size: row.get(1)?,
        content_hash: row.get(2)?,
        ingested_at: row.get(3)?,
        source: row.get(4)?,
        target_table: row.get(5)?,
    })
}

/// Look up an entry using an open connection (or transaction)
pub(crate) fn lookup_in(conn: &Connection, filename: &str) -> Result<Option<LedgerEntry>> {
    let sql = format!("{} WHERE filename = ?", select_sql());
    let raw = conn.query_row(&sql, [filename], raw_entry).optional()?;
    raw.map(RawEntry::into_entry).transpose()
}

/// Insert an entry using an open connection (or transaction).
///
/// Fails with `DuplicateKey` if the filename is already present; the ledger
/// is never upserted.
pub(crate) fn record_in(conn: &Connection, entry: &LedgerEntry) -> Result<()> {
    if lookup_in(conn, &entry.filename)?.is_some() {
        return Err(Error::DuplicateKey {
            filename: entry.filename.clone(),
        });
    }

    conn.execute(
        &format!(
            "INSERT INTO {} (filename, size, content_hash, ingested_at, source, target_table) \
             VALUES (?, ?, ?, CAST(? AS TIMESTAMP), ?, ?)",
            ledger_table()
        ),
        duckdb::params![
            entry.filename,
            entry.size as i64,
            entry.content_hash,
            format_sql_timestamp(&entry.ingested_at),
            entry.source,
            entry.target_table,
        ],
    )?;

    Ok(())
}
