//! Pipeline configuration
//!
//! The pipeline is described by one YAML file: where the warehouse lives,
//! which drop-zone prefixes feed which staged tables, how transformations
//! and the quality gate run, and which curated datasets are exported where.
//!
//! `${NAME}` references anywhere in the file are replaced with environment
//! variables before parsing, so secrets stay out of the file itself.

use crate::error::{Error, Result};
use crate::ingest::routing::{validate_columns, Router};
use crate::output::dataset_dir;
use crate::warehouse::TableName;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Environment variable overriding `warehouse.path`
pub const ENV_WAREHOUSE: &str = "DROPLEDGER_WAREHOUSE";

/// Environment variable overriding `drop_zone.root`
pub const ENV_DROP_ZONE: &str = "DROPLEDGER_DROP_ZONE";

/// Environment variable overriding `drop_zone.stability_secs`
pub const ENV_STABILITY_SECS: &str = "DROPLEDGER_STABILITY_SECS";

/// Warehouse path meaning "in memory"
pub const IN_MEMORY: &str = ":memory:";

/// Regex for environment references: ${NAME}
static ENV_REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference regex is valid")
});

// ============================================================================
// Top-Level Pipeline Config
// ============================================================================

/// Complete pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Warehouse file
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Drop zone to scan for CSV files
    pub drop_zone: DropZoneConfig,

    /// Prefix routes from drop-zone paths to staged tables
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Transformation step run after ingestion
    #[serde(default)]
    pub transform: TransformConfig,

    /// Quality gate run before exports
    #[serde(default)]
    pub quality_gate: QualityGateConfig,

    /// Curated datasets and their exports
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,

    /// HTTP client settings for incremental sinks
    #[serde(default)]
    pub http: HttpConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file, applying environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string (no env overrides, no validation)
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let expanded = expand_env_refs(yaml, |key| std::env::var(key).ok())?;
        let config: PipelineConfig = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("Failed to parse pipeline YAML: {e}")))?;
        Ok(config)
    }

    /// Apply `DROPLEDGER_*` overrides using the given lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup(ENV_WAREHOUSE) {
            self.warehouse.path = path;
        }
        if let Some(root) = lookup(ENV_DROP_ZONE) {
            self.drop_zone.root = PathBuf::from(root);
        }
        if let Some(secs) = lookup(ENV_STABILITY_SECS) {
            self.drop_zone.stability_secs = secs.trim().parse().map_err(|_| {
                Error::invalid_value(ENV_STABILITY_SECS, format!("'{secs}' is not a number"))
            })?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_drop_zone(&self.drop_zone)?;

        // Builds the router, which checks prefixes and table names
        Router::new(&self.sources)?;

        validate_transform(&self.transform)?;
        validate_quality_gate(&self.quality_gate)?;

        let names: HashSet<_> = self.datasets.iter().map(|d| &d.name).collect();
        if names.len() != self.datasets.len() {
            return Err(Error::config("Duplicate dataset names found"));
        }
        let mut dirs: HashMap<String, &str> = HashMap::new();
        for dataset in &self.datasets {
            validate_dataset(dataset)?;
            if let Some(other) = dirs.insert(dataset_dir(&dataset.name), &dataset.name) {
                return Err(Error::invalid_value(
                    "datasets.name",
                    format!(
                        "'{}' and '{other}' would share the snapshot directory '{}'",
                        dataset.name,
                        dataset_dir(&dataset.name)
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Look up a dataset by name
    pub fn dataset(&self, name: &str) -> Result<&DatasetConfig> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::UnknownDataset {
                dataset: name.to_string(),
            })
    }
}

// ============================================================================
// Warehouse / Drop Zone
// ============================================================================

/// Warehouse location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Path to the DuckDB file, or `:memory:`
    #[serde(default = "default_warehouse_path")]
    pub path: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
        }
    }
}

impl WarehouseConfig {
    /// Check if the warehouse is in memory
    pub fn is_in_memory(&self) -> bool {
        self.path == IN_MEMORY
    }
}

fn default_warehouse_path() -> String {
    "warehouse/analytics.duckdb".to_string()
}

/// Drop-zone settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropZoneConfig {
    /// Root directory; file identities are paths relative to it
    pub root: PathBuf,

    /// Quiescence window in seconds
    #[serde(default = "default_stability_secs")]
    pub stability_secs: f64,
}

impl DropZoneConfig {
    /// Quiescence window as a duration
    pub fn stability_window(&self) -> Duration {
        Duration::from_secs_f64(self.stability_secs.max(0.0))
    }
}

fn default_stability_secs() -> f64 {
    8.0
}

// ============================================================================
// Sources
// ============================================================================

/// One drop-zone prefix and the staged table it feeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Drop-zone-relative directory prefix, or file name prefix with
    /// `match: filename`
    pub prefix: String,

    /// What the prefix is compared against
    #[serde(default, rename = "match")]
    pub match_on: PrefixMatch,

    /// Staged table name; derived from the prefix when omitted
    #[serde(default)]
    pub table: Option<String>,

    /// Fixed data columns; taken from the first file's header when omitted
    #[serde(default)]
    pub columns: Option<Vec<String>>,

    /// CSV field delimiter
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Collapse identical rows within one file
    #[serde(default = "default_true")]
    pub dedupe_rows: bool,
}

/// How a source prefix selects drop-zone files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixMatch {
    /// Leading whole path components: `bank` takes `bank/2024/jan.csv`
    #[default]
    Path,
    /// Start of the file name in any directory: `bank_` takes `bank_2024-05.csv`
    Filename,
}

fn default_delimiter() -> char {
    ','
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Transform / Quality Gate
// ============================================================================

/// Transformation step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformConfig {
    /// No transformation; exports read staged or pre-existing tables
    #[default]
    None,

    /// Run every `*.sql` file in a directory, in lexical order, in one transaction
    Sql {
        /// Directory holding the scripts
        dir: PathBuf,
    },

    /// Run an external command (e.g. `dbt build`) with the warehouse detached
    Command {
        /// Program to run
        program: String,
        /// Arguments
        #[serde(default)]
        args: Vec<String>,
        /// Working directory
        #[serde(default)]
        working_dir: Option<PathBuf>,
        /// Extra environment variables
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

/// Quality gate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualityGateConfig {
    /// Always approve
    #[default]
    None,

    /// Each assertion query must return zero rows
    Sql {
        /// Named assertions
        assertions: Vec<SqlAssertion>,
    },

    /// Approve when the command exits with status 0
    Command {
        /// Program to run
        program: String,
        /// Arguments
        #[serde(default)]
        args: Vec<String>,
        /// Working directory
        #[serde(default)]
        working_dir: Option<PathBuf>,
        /// Extra environment variables
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

/// A named query whose rows are violations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlAssertion {
    /// Name reported on failure
    pub name: String,
    /// Query returning violating rows
    pub sql: String,
}

// ============================================================================
// Datasets
// ============================================================================

/// A curated dataset and its exports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset name, also the watermark key and the snapshot directory
    pub name: String,

    /// Curated table (`table` or `schema.table`)
    pub table: String,

    /// Event timestamp column
    #[serde(default = "default_ts_column")]
    pub ts_column: String,

    /// Surrogate id column
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Full snapshot export
    #[serde(default)]
    pub snapshot: Option<SnapshotConfig>,

    /// Incremental export
    #[serde(default)]
    pub incremental: Option<IncrementalConfig>,
}

impl DatasetConfig {
    /// Parsed curated table name
    pub fn table_name(&self) -> Result<TableName> {
        TableName::parse(&self.table)
    }
}

fn default_ts_column() -> String {
    "event_ts".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

/// Snapshot export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Local directory or `s3://`, `r2://`, `gs://`, `az://` URL
    pub destination: String,

    /// Serialization format
    #[serde(default)]
    pub format: SnapshotFormat,

    /// Alias path (relative to the destination); defaults to `{dataset}/latest.{ext}`
    #[serde(default)]
    pub latest_path: Option<String>,
}

/// Snapshot serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    /// Header plus rows
    #[default]
    Csv,
    /// Arrow-typed Parquet
    Parquet,
}

impl SnapshotFormat {
    /// File extension
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

/// Incremental export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalConfig {
    /// Destination sink
    pub sink: SinkConfig,

    /// Deliver at most this many rows per append call
    #[serde(default)]
    pub max_rows_per_append: Option<usize>,
}

/// Incremental sink definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// POST JSON batches to an endpoint
    Http {
        /// Endpoint URL
        url: String,
        /// Authentication
        #[serde(default)]
        auth: SinkAuthConfig,
        /// Extra headers
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    /// Append rows to a spreadsheet range
    Sheets {
        /// Spreadsheet id
        spreadsheet_id: String,
        /// Target range, e.g. `Sheet1!A1`
        #[serde(default = "default_sheet_range")]
        range: String,
        /// API base URL
        #[serde(default = "default_sheets_base_url")]
        base_url: String,
        /// Service account credentials
        credentials: ServiceAccountConfig,
        /// Sheet columns in order; empty sends every curated column under
        /// its own name
        #[serde(default)]
        columns: Vec<SheetColumn>,
    },

    /// Append rows to a local CSV file
    CsvFile {
        /// File path
        path: PathBuf,
    },
}

/// One spreadsheet column: the curated column it shows and its header text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetColumn {
    pub column: String,
    pub header: String,
}

fn default_sheet_range() -> String {
    "Sheet1!A1".to_string()
}

fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

/// Authentication for the HTTP sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkAuthConfig {
    /// No authentication
    #[default]
    None,
    /// Bearer token
    Bearer {
        /// Token value
        token: String,
    },
    /// Fixed headers
    CustomHeaders {
        /// Headers to add
        headers: HashMap<String, String>,
    },
}

/// Service account credentials for the spreadsheet sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAccountConfig {
    /// Path to a service-account JSON key file
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Service account email (when not using a key file)
    #[serde(default)]
    pub client_email: Option<String>,

    /// PEM private key (when not using a key file)
    #[serde(default)]
    pub private_key: Option<String>,

    /// Token endpoint
    #[serde(default)]
    pub token_uri: Option<String>,

    /// OAuth scopes
    #[serde(default = "default_sheets_scopes")]
    pub scopes: Vec<String>,
}

fn default_sheets_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/spreadsheets".to_string()]
}

// ============================================================================
// HTTP Config
// ============================================================================

/// HTTP client configuration for sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Maximum number of retries per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Requests per second limit
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            max_retries: default_max_retries(),
            requests_per_second: default_rps(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_rps() -> f64 {
    5.0
}

// ============================================================================
// Validation
// ============================================================================

fn validate_drop_zone(drop_zone: &DropZoneConfig) -> Result<()> {
    if drop_zone.root.as_os_str().is_empty() {
        return Err(Error::invalid_value("drop_zone.root", "cannot be empty"));
    }
    if !drop_zone.stability_secs.is_finite() || drop_zone.stability_secs < 0.0 {
        return Err(Error::invalid_value(
            "drop_zone.stability_secs",
            "must be a non-negative number",
        ));
    }
    Ok(())
}

fn validate_transform(transform: &TransformConfig) -> Result<()> {
    match transform {
        TransformConfig::None | TransformConfig::Sql { .. } => Ok(()),
        TransformConfig::Command { program, .. } if program.trim().is_empty() => Err(
            Error::invalid_value("transform.program", "cannot be empty"),
        ),
        TransformConfig::Command { .. } => Ok(()),
    }
}

fn validate_quality_gate(gate: &QualityGateConfig) -> Result<()> {
    match gate {
        QualityGateConfig::None => Ok(()),
        QualityGateConfig::Sql { assertions } => {
            let names: HashSet<_> = assertions.iter().map(|a| &a.name).collect();
            if names.len() != assertions.len() {
                return Err(Error::config("Duplicate quality assertion names found"));
            }
            if let Some(empty) = assertions.iter().find(|a| a.sql.trim().is_empty()) {
                return Err(Error::invalid_value(
                    "quality_gate.assertions",
                    format!("assertion '{}' has no SQL", empty.name),
                ));
            }
            Ok(())
        }
        QualityGateConfig::Command { program, .. } if program.trim().is_empty() => Err(
            Error::invalid_value("quality_gate.program", "cannot be empty"),
        ),
        QualityGateConfig::Command { .. } => Ok(()),
    }
}

fn validate_dataset(dataset: &DatasetConfig) -> Result<()> {
    if dataset.name.is_empty() {
        return Err(Error::config("Dataset name cannot be empty"));
    }
    if dataset.name.contains('/') || dataset.name.contains('\\') || dataset.name.contains("..") {
        return Err(Error::invalid_value(
            "datasets.name",
            format!("'{}' cannot contain path separators", dataset.name),
        ));
    }

    dataset.table_name()?;

    validate_columns(&[dataset.ts_column.clone(), dataset.id_column.clone()]).map_err(
        |message| {
            Error::invalid_value(
                "datasets.ts_column/id_column",
                format!("dataset '{}': {message}", dataset.name),
            )
        },
    )?;

    if let Some(snapshot) = &dataset.snapshot {
        if snapshot.destination.trim().is_empty() {
            return Err(Error::invalid_value(
                "datasets.snapshot.destination",
                format!("dataset '{}': cannot be empty", dataset.name),
            ));
        }
    }

    if let Some(incremental) = &dataset.incremental {
        if incremental.max_rows_per_append == Some(0) {
            return Err(Error::invalid_value(
                "datasets.incremental.max_rows_per_append",
                format!("dataset '{}': must be at least 1", dataset.name),
            ));
        }
        validate_sink(&dataset.name, &incremental.sink)?;
    }

    Ok(())
}

fn validate_sink(dataset: &str, sink: &SinkConfig) -> Result<()> {
    match sink {
        SinkConfig::Http { url, .. } => {
            url::Url::parse(url).map_err(|e| {
                Error::invalid_value(
                    "datasets.incremental.sink.url",
                    format!("dataset '{dataset}': {e}"),
                )
            })?;
        }
        SinkConfig::Sheets {
            spreadsheet_id,
            credentials,
            columns,
            ..
        } => {
            if spreadsheet_id.trim().is_empty() {
                return Err(Error::invalid_value(
                    "datasets.incremental.sink.spreadsheet_id",
                    format!("dataset '{dataset}': cannot be empty"),
                ));
            }
            let mut headers = HashSet::new();
            for column in columns {
                if column.column.trim().is_empty() || column.header.trim().is_empty() {
                    return Err(Error::invalid_value(
                        "datasets.incremental.sink.columns",
                        format!("dataset '{dataset}': column and header cannot be empty"),
                    ));
                }
                if !headers.insert(column.header.as_str()) {
                    return Err(Error::invalid_value(
                        "datasets.incremental.sink.columns",
                        format!("dataset '{dataset}': duplicate header '{}'", column.header),
                    ));
                }
            }
            let inline = credentials.client_email.is_some() && credentials.private_key.is_some();
            if credentials.credentials_file.is_none() && !inline {
                return Err(Error::invalid_value(
                    "datasets.incremental.sink.credentials",
                    format!(
                        "dataset '{dataset}': set credentials_file or client_email + private_key"
                    ),
                ));
            }
        }
        SinkConfig::CsvFile { path } => {
            if path.as_os_str().is_empty() {
                return Err(Error::invalid_value(
                    "datasets.incremental.sink.path",
                    format!("dataset '{dataset}': cannot be empty"),
                ));
            }
        }
    }
    Ok(())
}

/// Replace `${NAME}` references using the given lookup
pub fn expand_env_refs(text: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut missing = Vec::new();
    let expanded = ENV_REF_REGEX.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            missing.push(name.to_string());
            String::new()
        })
    });

    if missing.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(Error::config(format!(
            "Undefined environment variables: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL: &str = r#"
warehouse:
  path: /data/warehouse/analytics.duckdb
drop_zone:
  root: /data/drop
  stability_secs: 2
sources:
  - prefix: T-Bank/transactions
  - prefix: cards
    table: card_rows
    columns: [id, amount, event_ts]
    delimiter: ";"
    dedupe_rows: false
transform:
  type: sql
  dir: ./transform
quality_gate:
  type: sql
  assertions:
    - name: no_null_ids
      sql: SELECT * FROM curated.transactions WHERE id IS NULL
datasets:
  - name: transactions
    table: curated.transactions
    ts_column: booked_at
    id_column: tx_id
    snapshot:
      destination: /data/exports
      format: parquet
    incremental:
      max_rows_per_append: 500
      sink:
        type: csv_file
        path: /data/out/transactions.csv
"#;

    #[test]
    fn test_parse_full_config() {
        let config = PipelineConfig::from_yaml_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.warehouse.path, "/data/warehouse/analytics.duckdb");
        assert_eq!(config.drop_zone.stability_window(), Duration::from_secs(2));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].delimiter, ',');
        assert!(config.sources[0].dedupe_rows);
        assert_eq!(config.sources[1].delimiter, ';');
        assert!(matches!(config.transform, TransformConfig::Sql { .. }));

        let dataset = config.dataset("transactions").unwrap();
        assert_eq!(dataset.ts_column, "booked_at");
        let snapshot = dataset.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.format, SnapshotFormat::Parquet);
        let incremental = dataset.incremental.as_ref().unwrap();
        assert_eq!(incremental.max_rows_per_append, Some(500));
        assert!(matches!(incremental.sink, SinkConfig::CsvFile { .. }));
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_yaml_str("drop_zone:\n  root: /drop\n").unwrap();
        config.validate().unwrap();

        assert_eq!(config.warehouse.path, "warehouse/analytics.duckdb");
        assert_eq!(config.drop_zone.stability_secs, 8.0);
        assert!(matches!(config.transform, TransformConfig::None));
        assert!(matches!(config.quality_gate, QualityGateConfig::None));
        assert_eq!(config.http.timeout_seconds, 30);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::from_yaml_str(FULL).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_WAREHOUSE, ":memory:"),
            (ENV_DROP_ZONE, "/elsewhere"),
            (ENV_STABILITY_SECS, "0.5"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(config.warehouse.is_in_memory());
        assert_eq!(config.drop_zone.root, PathBuf::from("/elsewhere"));
        assert_eq!(
            config.drop_zone.stability_window(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_bad_stability_override() {
        let mut config = PipelineConfig::from_yaml_str(FULL).unwrap();
        let err = config
            .apply_overrides(|key| (key == ENV_STABILITY_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_STABILITY_SECS));
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let yaml = r#"
drop_zone:
  root: /drop
sources:
  - prefix: bank
  - prefix: bank/
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_dataset_rejected() {
        let yaml = r#"
drop_zone:
  root: /drop
datasets:
  - name: a
    table: t
  - name: a
    table: u
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate dataset names"));
    }

    #[test]
    fn test_datasets_sharing_snapshot_dir_rejected() {
        let yaml = r#"
drop_zone:
  root: /drop
datasets:
  - name: curated.daily
    table: t
  - name: curated_daily
    table: u
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { .. }));
        assert!(err.to_string().contains("curated_daily"));
    }

    #[test]
    fn test_file_name_source() {
        let yaml = r#"
drop_zone:
  root: /drop
sources:
  - prefix: bank_
    match: filename
  - prefix: bank
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sources[0].match_on, PrefixMatch::Filename);
        assert_eq!(config.sources[1].match_on, PrefixMatch::Path);
    }

    #[test]
    fn test_sheets_sink_requires_credentials() {
        let yaml = r#"
drop_zone:
  root: /drop
datasets:
  - name: a
    table: t
    incremental:
      sink:
        type: sheets
        spreadsheet_id: abc
        credentials: {}
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn test_sheets_sink_columns() {
        let yaml = r#"
drop_zone:
  root: /drop
datasets:
  - name: a
    table: t
    incremental:
      sink:
        type: sheets
        spreadsheet_id: abc
        credentials:
          client_email: svc@example.com
          private_key: key
        columns:
          - { column: transaction_dt, header: Date }
          - { column: transaction_amt, header: "Amount, Currency" }
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        config.validate().unwrap();
        let Some(incremental) = &config.datasets[0].incremental else {
            panic!("incremental export missing");
        };
        let SinkConfig::Sheets { columns, .. } = &incremental.sink else {
            panic!("expected a sheets sink");
        };
        assert_eq!(
            columns.iter().map(|c| c.header.as_str()).collect::<Vec<_>>(),
            vec!["Date", "Amount, Currency"]
        );

        let duplicated = yaml.replace("header: Date", "header: \"Amount, Currency\"");
        let err = PipelineConfig::from_yaml_str(&duplicated)
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate header"));
    }

    #[test]
    fn test_http_sink_requires_valid_url() {
        let yaml = r#"
drop_zone:
  root: /drop
datasets:
  - name: a
    table: t
    incremental:
      sink:
        type: http
        url: not a url
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_dataset() {
        let config = PipelineConfig::from_yaml_str(FULL).unwrap();
        assert!(matches!(
            config.dataset("missing"),
            Err(Error::UnknownDataset { .. })
        ));
    }

    #[test]
    fn test_expand_env_refs() {
        let lookup = |key: &str| (key == "TOKEN").then(|| "s3cret".to_string());

        assert_eq!(
            expand_env_refs("token: ${TOKEN}", lookup).unwrap(),
            "token: s3cret"
        );
        assert_eq!(expand_env_refs("plain $TOKEN", lookup).unwrap(), "plain $TOKEN");

        let err = expand_env_refs("a: ${MISSING_ONE}", lookup).unwrap_err();
        assert!(err.to_string().contains("MISSING_ONE"));
    }
}
