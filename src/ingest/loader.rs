//! Batch loader
//!
//! Turns one stable, not-yet-ingested drop-zone file into staged rows plus a
//! ledger entry, atomically. The sequence per file is:
//!
//! 1. stability check (outcome `NotStable` if the file is still changing)
//! 2. fingerprint (size + SHA-256)
//! 3. ledger decision (ingest / skip / conflict)
//! 4. parse and insert inside one transaction, re-hashing the bytes as they
//!    are read, then insert the ledger entry and commit
//!
//! Any failure inside step 4 drops the transaction, so neither rows nor the
//! ledger entry become visible.

use super::fingerprint::{fingerprint, Fingerprint, HashingReader};
use super::ledger::{self, LedgerDecision, LedgerEntry};
use super::routing::{validate_columns, Route, Router, RESERVED_COLUMN_PREFIX};
use super::stability::StabilityDetector;
use super::types::{FileFailure, IngestReport, LoadOutcome};
use crate::error::{Error, Result};
use crate::types::format_sql_timestamp;
use crate::warehouse::{quote_ident, table_columns, table_exists, Warehouse};
use chrono::{NaiveDateTime, Utc};
use duckdb::Connection;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Metadata column: row hash
pub const LOAD_KEY_COLUMN: &str = "__load_key";

/// Metadata column: drop-zone-relative source filename
pub const SOURCE_FILE_COLUMN: &str = "__source_file";

/// Metadata column: load time (UTC)
pub const INGESTED_AT_COLUMN: &str = "__ingested_at";

/// Tag hashed in place of NULL cells
const NULL_TAG: &str = "<NULL>";

/// Loads drop-zone files into staged tables
pub struct BatchLoader {
    warehouse: Arc<Warehouse>,
    router: Router,
    drop_zone: PathBuf,
    stability: StabilityDetector,
}

impl BatchLoader {
    /// Create a loader
    pub fn new(
        warehouse: Arc<Warehouse>,
        router: Router,
        drop_zone: impl Into<PathBuf>,
        stability: StabilityDetector,
    ) -> Self {
        Self {
            warehouse,
            router,
            drop_zone: drop_zone.into(),
            stability,
        }
    }

    /// Drop-zone root
    pub fn drop_zone(&self) -> &Path {
        &self.drop_zone
    }

    /// The router in use
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Drop-zone-relative POSIX filename for a path inside the drop zone
    pub fn relative_name(&self, path: &Path) -> Result<String> {
        let relative = if path.is_absolute() || path.starts_with(&self.drop_zone) {
            path.strip_prefix(&self.drop_zone).map_err(|_| {
                Error::invalid_value(
                    "path",
                    format!(
                        "'{}' is outside the drop zone '{}'",
                        path.display(),
                        self.drop_zone.display()
                    ),
                )
            })?
        } else {
            path
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(Error::invalid_value(
                        "path",
                        format!("'{}' is not a plain drop-zone path", path.display()),
                    ))
                }
            }
        }
        Ok(parts.join("/"))
    }

    /// Load a single file (absolute, or relative to the drop zone).
    ///
    /// Blocks for one stability window.
    pub fn load(&self, path: &Path) -> Result<LoadOutcome> {
        let filename = self.relative_name(path)?;
        let route = self.router.route(&filename).ok_or_else(|| Error::Unrouted {
            filename: filename.clone(),
        })?;
        let absolute = self.drop_zone.join(&filename);

        if !self.stability.is_stable(&absolute) {
            tracing::info!(filename = %filename, "Skipping unstable file");
            return Ok(LoadOutcome::NotStable { filename });
        }

        self.load_stable(&absolute, &filename, route)
    }

    /// Load a file already known to be stable
    fn load_stable(&self, path: &Path, filename: &str, route: &Route) -> Result<LoadOutcome> {
        let fp = fingerprint(path)?;
        self.load_fingerprinted(path, filename, route, fp)
    }

    /// Stage `path` if its bytes still hash to `fp`; a mismatch rolls the
    /// transaction back and reports the file as not stable
    pub(super) fn load_fingerprinted(
        &self,
        path: &Path,
        filename: &str,
        route: &Route,
        fp: Fingerprint,
    ) -> Result<LoadOutcome> {
        match ledger::IngestLedger::new(Arc::clone(&self.warehouse)).decide(filename, &fp)? {
            LedgerDecision::Ingest => {}
            LedgerDecision::Skip(entry) => {
                tracing::info!(
                    filename = %filename,
                    ingested_at = %entry.ingested_at,
                    "File already ingested, skipping"
                );
                return Ok(LoadOutcome::AlreadyIngested {
                    filename: filename.to_string(),
                });
            }
            LedgerDecision::Conflict(entry) => {
                tracing::error!(
                    filename = %filename,
                    recorded_size = entry.size,
                    recorded_hash = %entry.content_hash,
                    size = fp.size,
                    content_hash = %fp.content_hash,
                    "Conflicting re-drop: file content changed after ingestion"
                );
                return Err(LedgerDecision::conflict_error(&entry, &fp));
            }
        }

        let ingested_at = Utc::now().naive_utc();
        let staged = route.staged_table();

        let result = self.warehouse.transaction(|conn| {
            let stats = stage_file(conn, path, filename, route, &fp, &ingested_at)?;
            ledger::record_in(
                conn,
                &LedgerEntry {
                    filename: filename.to_string(),
                    size: fp.size,
                    content_hash: fp.content_hash.clone(),
                    ingested_at,
                    source: Some(route.prefix.clone()),
                    target_table: Some(staged.to_string()),
                },
            )?;
            Ok(stats)
        });

        match result {
            Ok(stats) => {
                tracing::info!(
                    filename = %filename,
                    table = %staged,
                    rows_read = stats.rows_read,
                    rows_inserted = stats.rows_inserted,
                    "Ingested file"
                );
                Ok(LoadOutcome::Ingested {
                    filename: filename.to_string(),
                    table: staged.to_string(),
                    rows_read: stats.rows_read,
                    rows_inserted: stats.rows_inserted,
                    size: fp.size,
                    content_hash: fp.content_hash,
                })
            }
            Err(Error::NotStable { .. }) => {
                tracing::info!(filename = %filename, "File changed while loading, rolled back");
                Ok(LoadOutcome::NotStable {
                    filename: filename.to_string(),
                })
            }
            Err(e @ Error::ParseFailure { .. }) => {
                tracing::warn!(filename = %filename, error = %e, "Failed to parse file");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// All CSV files under the drop zone, as sorted drop-zone-relative names
    pub fn scan(&self) -> Result<Vec<String>> {
        if !self.drop_zone.exists() {
            return Err(Error::config(format!(
                "Drop zone '{}' does not exist",
                self.drop_zone.display()
            )));
        }
        let files = discover_csv_files(&self.drop_zone)?;

        let mut names = files
            .iter()
            .map(|path| self.relative_name(path))
            .collect::<Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    /// Scan the drop zone and load every routed file.
    ///
    /// Per-file errors are recorded in the report; only fatal errors
    /// (ledger invariant violations) abort the scan.
    pub fn ingest_all(&self) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        let mut candidates = Vec::new();
        for filename in self.scan()? {
            if self.router.route(&filename).is_some() {
                candidates.push(self.drop_zone.join(&filename));
            } else {
                tracing::warn!(filename = %filename, "No route for file, skipping");
                report.unrouted.push(filename);
            }
        }

        let (stable, unstable) = self.stability.partition_stable(&candidates);
        for path in unstable {
            let filename = self.relative_name(&path)?;
            tracing::info!(filename = %filename, "Skipping unstable file");
            report.not_stable.push(filename);
        }

        for path in stable {
            let filename = self.relative_name(&path)?;
            let Some(route) = self.router.route(&filename) else {
                continue;
            };

            match self.load_stable(&path, &filename, route) {
                Ok(outcome) => report.record(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    report.failed.push(FileFailure {
                        filename,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            ingested = report.ingested.len(),
            skipped = report.already_ingested.len(),
            not_stable = report.not_stable.len(),
            failed = report.failed.len(),
            unrouted = report.unrouted.len(),
            "Ingestion complete"
        );

        Ok(report)
    }
}

/// Every `*.csv` file below `root`, any depth, extension matched case-insensitively
fn discover_csv_files(root: &Path) -> Result<Vec<PathBuf>> {
    let root_text = root
        .to_str()
        .ok_or_else(|| Error::config(format!("Drop zone '{}' is not UTF-8", root.display())))?;
    let pattern = format!("{}/**/*.csv", glob::Pattern::escape(root_text.trim_end_matches('/')));
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let entries = glob::glob_with(&pattern, options)
        .map_err(|e| Error::config(format!("Invalid drop zone pattern '{pattern}': {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            Error::io(path, e.into_error())
        })?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Row counts for one staged file
#[derive(Debug, Clone, Copy, Default)]
struct StageStats {
    rows_read: u64,
    rows_inserted: u64,
}

/// Parse a file and insert its rows through an open transaction
fn stage_file(
    conn: &Connection,
    path: &Path,
    filename: &str,
    route: &Route,
    expected: &Fingerprint,
    ingested_at: &NaiveDateTime,
) -> Result<StageStats> {
    let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hashing = HashingReader::new(BufReader::new(file));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(route.delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(&mut hashing);

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| csv_failure(filename, &e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if header.is_empty() || header.iter().all(String::is_empty) {
        return Err(Error::parse(filename, 1, "empty header"));
    }
    validate_columns(&header).map_err(|message| Error::parse(filename, 1, message))?;

    let table_columns = ensure_staged_table(conn, route, &header)?;
    let unknown: Vec<&str> = header
        .iter()
        .filter(|h| !table_columns.contains(h))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(Error::parse(
            filename,
            1,
            format!(
                "schema mismatch: columns {} are not in {}",
                unknown.join(", "),
                route.staged_table()
            ),
        ));
    }

    // Position of each table column in the file, if present
    let positions: Vec<Option<usize>> = table_columns
        .iter()
        .map(|column| header.iter().position(|h| h == column))
        .collect();

    // Load key covers the file's own columns, in sorted order
    let mut key_order: Vec<usize> = (0..header.len()).collect();
    key_order.sort_by(|a, b| header[*a].cmp(&header[*b]));

    let mut column_list: Vec<String> = table_columns.iter().map(|c| quote_ident(c)).collect();
    column_list.push(quote_ident(LOAD_KEY_COLUMN));
    column_list.push(quote_ident(SOURCE_FILE_COLUMN));
    column_list.push(quote_ident(INGESTED_AT_COLUMN));

    let mut placeholders = vec!["?"; table_columns.len() + 2];
    placeholders.push("CAST(? AS TIMESTAMP)");

    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        route.staged_table().quoted(),
        column_list.join(", "),
        placeholders.join(", ")
    );
    let mut insert = conn.prepare(&insert_sql)?;

    let ingested_at = format_sql_timestamp(ingested_at);
    let mut seen_keys = HashSet::new();
    let mut stats = StageStats::default();

    for record in reader.records() {
        let record = record.map_err(|e| csv_failure(filename, &e))?;
        stats.rows_read += 1;

        let cells: Vec<Option<&str>> = record
            .iter()
            .map(|cell| if cell.is_empty() { None } else { Some(cell) })
            .collect();

        let load_key = load_key(key_order.iter().map(|&i| cells[i]));
        if route.dedupe_rows && !seen_keys.insert(load_key.clone()) {
            continue;
        }

        let mut values: Vec<Option<String>> = positions
            .iter()
            .map(|position| position.and_then(|i| cells[i]).map(str::to_string))
            .collect();
        values.push(Some(load_key));
        values.push(Some(filename.to_string()));
        values.push(Some(ingested_at.clone()));

        insert.execute(duckdb::params_from_iter(values))?;
        stats.rows_inserted += 1;
    }

    drop(reader);
    hashing.drain().map_err(|e| Error::io(path, e))?;
    let actual = hashing.finish();
    if actual != *expected {
        return Err(Error::NotStable {
            filename: filename.to_string(),
        });
    }

    Ok(stats)
}

/// Create the staged table if needed and return its data columns
fn ensure_staged_table(conn: &Connection, route: &Route, header: &[String]) -> Result<Vec<String>> {
    let table = route.staged_table();

    if table_exists(conn, &table)? {
        let columns = table_columns(conn, &table)?;
        return Ok(columns
            .into_iter()
            .filter(|c| !c.starts_with(RESERVED_COLUMN_PREFIX))
            .collect());
    }

    let columns = route.columns.clone().unwrap_or_else(|| header.to_vec());
    let mut ddl: Vec<String> = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect();
    ddl.push(format!("{} VARCHAR NOT NULL", quote_ident(LOAD_KEY_COLUMN)));
    ddl.push(format!("{} VARCHAR NOT NULL", quote_ident(SOURCE_FILE_COLUMN)));
    ddl.push(format!("{} TIMESTAMP NOT NULL", quote_ident(INGESTED_AT_COLUMN)));

    conn.execute_batch(&format!(
        "CREATE TABLE {} ({})",
        table.quoted(),
        ddl.join(", ")
    ))?;
    tracing::debug!(table = %table, columns = columns.len(), "Created staged table");

    Ok(columns)
}

/// Hash of one row: each value (or the NULL tag) is length-prefixed and the
/// pieces are joined with `|`, so no delimiter inside a value can collide.
pub fn load_key<'a>(values: impl Iterator<Item = Option<&'a str>>) -> String {
    let pieces: Vec<String> = values
        .map(|value| {
            let value = value.unwrap_or(NULL_TAG);
            format!("{}:{}", value.chars().count(), value)
        })
        .collect();
    hex::encode(Sha256::digest(pieces.join("|").as_bytes()))
}

fn csv_failure(filename: &str, error: &csv::Error) -> Error {
    let line = error.position().map_or(0, csv::Position::line);
    let message = match error.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("found {len} fields, expected {expected_len}"),
        csv::ErrorKind::Utf8 { .. } => "invalid UTF-8".to_string(),
        _ => error.to_string(),
    };
    Error::parse(filename, line, message)
}
