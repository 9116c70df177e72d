//! Drop-zone path routing
//!
//! Every file is routed to a staged table by an explicit prefix map taken
//! from the configuration. A prefix matches either leading whole path
//! components or the start of the file name. Path routes are tried before
//! file name routes, and within each kind the longest prefix wins.

use crate::config::{PrefixMatch, SourceConfig};
use crate::error::{Error, Result};
use crate::warehouse::{TableName, RAW_SCHEMA};
use std::collections::HashSet;

/// Column names starting with this prefix are reserved for load metadata
pub const RESERVED_COLUMN_PREFIX: &str = "__";

/// A validated route from a drop-zone prefix to a staged table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Normalized prefix (no leading or trailing slash)
    pub prefix: String,
    pub match_on: PrefixMatch,
    /// Staged table name inside the raw schema
    pub table: String,
    /// Declared data columns, if the table schema is fixed up front
    pub columns: Option<Vec<String>>,
    /// CSV field delimiter
    pub delimiter: u8,
    /// Collapse identical rows within one file
    pub dedupe_rows: bool,
}

impl Route {
    /// Fully qualified staged table
    pub fn staged_table(&self) -> TableName {
        TableName::new(RAW_SCHEMA, &self.table)
    }

    /// Check whether a drop-zone-relative filename falls under this route
    pub fn matches(&self, filename: &str) -> bool {
        match self.match_on {
            PrefixMatch::Path => filename
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/')),
            PrefixMatch::Filename => {
                let name = filename.rsplit('/').next().unwrap_or(filename);
                name.len() > self.prefix.len() && name.starts_with(self.prefix.as_str())
            }
        }
    }
}

/// Prefix router, validated at construction
#[derive(Debug, Clone, Default)]
pub struct Router {
    /// Path routes first, then file name routes; longest prefix first in each
    routes: Vec<Route>,
}

impl Router {
    /// Build and validate a router from source configuration
    pub fn new(sources: &[SourceConfig]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut routes = Vec::with_capacity(sources.len());

        for source in sources {
            let route = build_route(source)?;
            if !seen.insert((route.match_on, route.prefix.clone())) {
                return Err(Error::config(format!(
                    "Duplicate source prefix '{}'",
                    route.prefix
                )));
            }
            routes.push(route);
        }

        routes.sort_by(|a, b| {
            let kind = |r: &Route| matches!(r.match_on, PrefixMatch::Filename);
            kind(a)
                .cmp(&kind(b))
                .then_with(|| b.prefix.len().cmp(&a.prefix.len()))
                .then_with(|| a.prefix.cmp(&b.prefix))
        });

        Ok(Self { routes })
    }

    /// Find the route for a drop-zone-relative filename
    pub fn route(&self, filename: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(filename))
    }

    /// Check whether any routes are configured
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn build_route(source: &SourceConfig) -> Result<Route> {
    let prefix = normalize_prefix(&source.prefix);
    if prefix.is_empty() {
        return Err(Error::invalid_value(
            "sources.prefix",
            "prefix cannot be empty",
        ));
    }

    if source.match_on == PrefixMatch::Filename && prefix.contains('/') {
        return Err(Error::invalid_value(
            "sources.prefix",
            format!("file name prefix '{prefix}' cannot contain '/'"),
        ));
    }

    let table = match &source.table {
        Some(table) => table.clone(),
        None => derive_table_name(&prefix),
    };
    if !is_safe_identifier(&table) {
        return Err(Error::invalid_value(
            "sources.table",
            format!("'{table}' (prefix '{prefix}') is not a valid table name"),
        ));
    }

    if let Some(columns) = &source.columns {
        validate_columns(columns).map_err(|message| {
            Error::invalid_value("sources.columns", format!("prefix '{prefix}': {message}"))
        })?;
    }

    if !source.delimiter.is_ascii() {
        return Err(Error::invalid_value(
            "sources.delimiter",
            format!("prefix '{prefix}': delimiter must be a single ASCII character"),
        ));
    }

    Ok(Route {
        prefix,
        match_on: source.match_on,
        table,
        columns: source.columns.clone(),
        delimiter: source.delimiter as u8,
        dedupe_rows: source.dedupe_rows,
    })
}

/// Normalize a configured prefix to forward slashes without surrounding `/`
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.replace('\\', "/").trim_matches('/').to_string()
}

/// Derive a table name from a prefix: `T-Bank/transactions` -> `t_bank_transactions`
pub fn derive_table_name(prefix: &str) -> String {
    let lowered = prefix.to_lowercase();
    let mut name = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '_' };
        if c == '_' && name.ends_with('_') {
            continue;
        }
        name.push(c);
    }
    let name = name.trim_matches('_');
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name.to_string()
    }
}

/// Check whether a name is usable as a staged table name (`[A-Za-z0-9_]+`)
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a list of data column names (declared or taken from a header)
pub fn validate_columns(columns: &[String]) -> std::result::Result<(), String> {
    if columns.is_empty() {
        return Err("no columns".to_string());
    }
    let mut seen = HashSet::new();
    for column in columns {
        if column.trim().is_empty() {
            return Err("empty column name".to_string());
        }
        if column.starts_with(RESERVED_COLUMN_PREFIX) {
            return Err(format!("column '{column}' uses the reserved '__' prefix"));
        }
        if !seen.insert(column.as_str()) {
            return Err(format!("duplicate column '{column}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn source(prefix: &str, table: Option<&str>) -> SourceConfig {
        SourceConfig {
            prefix: prefix.to_string(),
            match_on: PrefixMatch::Path,
            table: table.map(String::from),
            columns: None,
            delimiter: ',',
            dedupe_rows: true,
        }
    }

    #[test_case("T-Bank/transactions", "t_bank_transactions")]
    #[test_case("Bank", "bank")]
    #[test_case("a--b//c", "a_b_c")]
    #[test_case("__x__", "x")]
    #[test_case("---", "unknown")]
    fn test_derive_table_name(prefix: &str, expected: &str) {
        assert_eq!(derive_table_name(prefix), expected);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = Router::new(&[
            source("bank", Some("bank_all")),
            source("bank/cards", Some("bank_cards")),
        ])
        .unwrap();

        assert_eq!(router.route("bank/cards/a.csv").unwrap().table, "bank_cards");
        assert_eq!(router.route("bank/other/a.csv").unwrap().table, "bank_all");
        assert_eq!(router.route("bank/a.csv").unwrap().table, "bank_all");
    }

    #[test]
    fn test_prefix_matches_whole_components() {
        let router = Router::new(&[source("bank", None)]).unwrap();
        assert!(router.route("bankx/a.csv").is_none());
        assert!(router.route("other/a.csv").is_none());
        assert!(router.route("bank").is_none());
    }

    #[test]
    fn test_file_name_prefix() {
        let mut by_name = source("bank_", None);
        by_name.match_on = PrefixMatch::Filename;
        let router = Router::new(&[by_name]).unwrap();

        let route = router.route("bank_2024-05.csv").unwrap();
        assert_eq!(route.table, "bank");
        assert!(router.route("exports/bank_2024-06.csv").is_some());
        assert!(router.route("bank_").is_none());
        assert!(router.route("bank_dir/jan.csv").is_none());
        assert!(router.route("card_2024-05.csv").is_none());
    }

    #[test]
    fn test_path_routes_win_over_file_name_routes() {
        let mut by_name = source("bank", Some("by_name"));
        by_name.match_on = PrefixMatch::Filename;
        let router = Router::new(&[by_name, source("bank", Some("by_path"))]).unwrap();

        assert_eq!(router.route("bank/bank_1.csv").unwrap().table, "by_path");
        assert_eq!(router.route("bank_1.csv").unwrap().table, "by_name");
        assert_eq!(router.route("other/bank.csv").unwrap().table, "by_name");
    }

    #[test]
    fn test_file_name_prefix_with_slash_rejected() {
        let mut by_name = source("bank/x", None);
        by_name.match_on = PrefixMatch::Filename;
        assert!(Router::new(&[by_name]).is_err());
    }

    #[test]
    fn test_prefix_normalization() {
        let router = Router::new(&[source("/T-Bank/transactions/", None)]).unwrap();
        let route = router.route("T-Bank/transactions/2024/jan.csv").unwrap();
        assert_eq!(route.prefix, "T-Bank/transactions");
        assert_eq!(route.table, "t_bank_transactions");
        assert_eq!(route.staged_table().to_string(), "raw.t_bank_transactions");
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let err = Router::new(&[source("bank", None), source("/bank/", None)]).unwrap_err();
        assert!(err.to_string().contains("Duplicate source prefix"));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        assert!(Router::new(&[source("/", None)]).is_err());
    }

    #[test]
    fn test_unsafe_table_rejected() {
        assert!(Router::new(&[source("bank", Some("drop table"))]).is_err());
    }

    #[test]
    fn test_validate_columns() {
        let cols = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(validate_columns(&cols(&["id", "amount"])).is_ok());
        assert!(validate_columns(&cols(&[])).is_err());
        assert!(validate_columns(&cols(&["id", ""])).is_err());
        assert!(validate_columns(&cols(&["id", "id"])).is_err());
        assert!(validate_columns(&cols(&["__load_key"])).is_err());
    }
}
