//! Error types for dropledger
//!
//! This module defines the error hierarchy for the whole crate. The first two
//! groups mirror the ingestion/export taxonomy: some variants are benign
//! (already-ingested files), some are scoped to one file or one dataset, and
//! a small set are invariant violations that must abort a run.

use thiserror::Error;

/// The main error type for dropledger
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Ingestion Errors
    // ============================================================================
    #[error("File '{filename}' is still being written")]
    NotStable { filename: String },

    #[error("Ledger already contains an entry for '{filename}'")]
    DuplicateKey { filename: String },

    #[error(
        "Conflicting re-drop of '{filename}': ledger has size={recorded_size} hash={recorded_hash}, \
         file has size={size} hash={content_hash}"
    )]
    ConflictingReDrop {
        filename: String,
        recorded_size: u64,
        recorded_hash: String,
        size: u64,
        content_hash: String,
    },

    #[error("Failed to parse '{filename}' at line {line}: {message}")]
    ParseFailure {
        filename: String,
        line: u64,
        message: String,
    },

    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No route matches '{filename}'")]
    Unrouted { filename: String },

    // ============================================================================
    // Export Errors
    // ============================================================================
    #[error(
        "Watermark for '{dataset}' cannot move backwards from ({current_ts}, {current_id}) \
         to ({new_ts}, {new_id})"
    )]
    NonMonotonic {
        dataset: String,
        current_ts: String,
        current_id: String,
        new_ts: String,
        new_id: String,
    },

    #[error("Sink rejected delivery for '{dataset}': {message}")]
    SinkDelivery { dataset: String, message: String },

    #[error("Dataset '{dataset}' is not configured")]
    UnknownDataset { dataset: String },

    #[error("Quality gate rejected the run: {reason}")]
    QualityGateRejected { reason: String },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Warehouse Errors
    // ============================================================================
    #[error("Warehouse error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Warehouse error: {message}")]
    Warehouse { message: String },

    // ============================================================================
    // HTTP / Auth Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Token refresh failed: {message}")]
    TokenRefresh { message: String },

    #[error("JWT generation failed: {message}")]
    JwtGeneration { message: String },

    // ============================================================================
    // Output Errors
    // ============================================================================
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Output error: {message}")]
    Output { message: String },

    // ============================================================================
    // Collaborator Errors
    // ============================================================================
    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a parse failure for a whole file
    pub fn parse(filename: impl Into<String>, line: u64, message: impl Into<String>) -> Self {
        Self::ParseFailure {
            filename: filename.into(),
            line,
            message: message.into(),
        }
    }

    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Create a warehouse error from a message
    pub fn warehouse(message: impl Into<String>) -> Self {
        Self::Warehouse {
            message: message.into(),
        }
    }

    /// Create a sink delivery error
    pub fn sink(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkDelivery {
            dataset: dataset.into(),
            message: message.into(),
        }
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create an output error
    pub fn output(message: impl Into<String>) -> Self {
        Self::Output {
            message: message.into(),
        }
    }

    /// Wrap a failed blocking task
    pub fn task(err: tokio::task::JoinError) -> Self {
        Self::Other(format!("background task failed: {err}"))
    }

    /// Create a command error
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Invariant violations that must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::NonMonotonic { .. } | Error::DuplicateKey { .. })
    }

    /// Check if this error is retryable on the next scheduling tick
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NotStable { .. }
            | Error::Io { .. }
            | Error::Http(_)
            | Error::RateLimited { .. }
            | Error::Timeout { .. }
            | Error::SinkDelivery { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Short machine-readable kind, used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotStable { .. } => "not_stable",
            Error::DuplicateKey { .. } => "duplicate_key",
            Error::ConflictingReDrop { .. } => "conflicting_re_drop",
            Error::ParseFailure { .. } => "parse_failure",
            Error::Io { .. } => "io_failure",
            Error::Unrouted { .. } => "unrouted",
            Error::NonMonotonic { .. } => "non_monotonic",
            Error::SinkDelivery { .. } => "sink_delivery_failure",
            Error::UnknownDataset { .. } => "unknown_dataset",
            Error::QualityGateRejected { .. } => "quality_gate_rejected",
            Error::Config { .. } | Error::InvalidConfigValue { .. } => "config",
            Error::YamlParse(_) | Error::JsonParse(_) => "config",
            Error::Database(_) | Error::Warehouse { .. } => "warehouse",
            Error::Http(_)
            | Error::HttpStatus { .. }
            | Error::RateLimited { .. }
            | Error::Timeout { .. }
            | Error::InvalidUrl(_) => "http",
            Error::Auth { .. } | Error::TokenRefresh { .. } | Error::JwtGeneration { .. } => {
                "auth"
            }
            Error::Arrow(_)
            | Error::Parquet(_)
            | Error::Csv(_)
            | Error::ObjectStore(_)
            | Error::Output { .. } => "output",
            Error::Command { .. } => "command",
            Error::Other(_) => "other",
        }
    }
}

/// Statuses a sink may answer while it is overloaded or restarting
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Result type alias for dropledger
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::parse("bank/a.csv", 3, "found 2 fields, expected 3");
        assert_eq!(
            err.to_string(),
            "Failed to parse 'bank/a.csv' at line 3: found 2 fields, expected 3"
        );

        let err = Error::http_status(404, "Not found");
        assert_eq!(err.to_string(), "HTTP 404: Not found");
    }

    #[test]
    fn test_conflicting_re_drop_names_both_versions() {
        let err = Error::ConflictingReDrop {
            filename: "bank/a.csv".to_string(),
            recorded_size: 10,
            recorded_hash: "aaa".to_string(),
            size: 12,
            content_hash: "bbb".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("size=10 hash=aaa"));
        assert!(text.contains("size=12 hash=bbb"));
        assert_eq!(err.kind(), "conflicting_re_drop");
    }

    #[test]
    fn test_is_fatal() {
        let err = Error::NonMonotonic {
            dataset: "d".to_string(),
            current_ts: "2024-01-02 00:00:00".to_string(),
            current_id: "2".to_string(),
            new_ts: "2024-01-01 00:00:00".to_string(),
            new_id: "1".to_string(),
        };
        assert!(err.is_fatal());
        assert!(Error::DuplicateKey {
            filename: "x".to_string()
        }
        .is_fatal());

        assert!(!Error::sink("d", "boom").is_fatal());
        assert!(!Error::parse("x", 1, "bad").is_fatal());
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::NotStable {
            filename: "x".to_string()
        }
        .is_retryable());
        assert!(Error::sink("d", "timeout").is_retryable());
        assert!(Error::RateLimited {
            retry_after_seconds: 60
        }
        .is_retryable());
        assert!(Error::http_status(503, "").is_retryable());
        assert!(Error::http_status(408, "").is_retryable());

        assert!(!Error::http_status(400, "").is_retryable());
        assert!(!Error::parse("x", 1, "bad").is_retryable());
        assert!(!Error::config("test").is_retryable());
    }
}
