//! Identifier quoting and DuckDB value conversion

use crate::error::{Error, Result};
use duckdb::types::{TimeUnit, Value as DbValue};
use serde_json::Value;
use std::fmt;

/// Quote an identifier (schema, table or column) for DuckDB
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A possibly schema-qualified table name, e.g. `curated.transactions`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    /// Schema, `None` for the default schema
    pub schema: Option<String>,
    /// Table name
    pub name: String,
}

impl TableName {
    /// Create a qualified table name
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Parse `table` or `schema.table`
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split('.').collect();
        let valid = |part: &str| !part.trim().is_empty();
        match parts.as_slice() {
            [name] if valid(name) => Ok(Self {
                schema: None,
                name: (*name).to_string(),
            }),
            [schema, name] if valid(schema) && valid(name) => Ok(Self::new(*schema, *name)),
            _ => Err(Error::invalid_value(
                "table",
                format!("'{value}' is not a table or schema.table name"),
            )),
        }
    }

    /// Quoted form for use in SQL
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }

    /// Schema used when looking the table up in `information_schema`
    pub fn schema_or_default(&self) -> &str {
        self.schema.as_deref().unwrap_or("main")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Convert a DuckDB value to JSON.
///
/// Timestamps become naive ISO-8601 strings and dates `YYYY-MM-DD`, so the
/// exporters and sinks never see raw epoch offsets.
pub fn duckdb_value_to_json(value: DbValue) -> Value {
    match value {
        DbValue::Null => Value::Null,
        DbValue::Boolean(b) => Value::Bool(b),
        DbValue::TinyInt(i) => Value::Number(i.into()),
        DbValue::SmallInt(i) => Value::Number(i.into()),
        DbValue::Int(i) => Value::Number(i.into()),
        DbValue::BigInt(i) => Value::Number(i.into()),
        DbValue::HugeInt(i) => Value::String(i.to_string()),
        DbValue::UTinyInt(i) => Value::Number(i.into()),
        DbValue::USmallInt(i) => Value::Number(i.into()),
        DbValue::UInt(i) => Value::Number(i.into()),
        DbValue::UBigInt(i) => Value::Number(i.into()),
        DbValue::Float(f) => {
            serde_json::Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number)
        }
        DbValue::Double(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        DbValue::Decimal(d) => Value::String(d.to_string()),
        DbValue::Text(s) => Value::String(s),
        DbValue::Enum(s) => Value::String(s),
        DbValue::Blob(b) => Value::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b,
        )),
        DbValue::Timestamp(unit, i) => {
            let micros = to_micros(unit, i);
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|dt| Value::String(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
                .unwrap_or(Value::Number(i.into()))
        }
        DbValue::Date32(d) => {
            // 719163 days from 0001-01-01 to 1970-01-01
            chrono::NaiveDate::from_num_days_from_ce_opt(d + 719_163)
                .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Number(d.into()))
        }
        DbValue::Time64(unit, t) => {
            let micros = to_micros(unit, t);
            let secs = micros / 1_000_000;
            let frac = micros % 1_000_000;
            Value::String(format!(
                "{:02}:{:02}:{:02}.{:06}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                frac
            ))
        }
        other => Value::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("amount"), "\"amount\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_table_name_parse() {
        let t = TableName::parse("curated.transactions").unwrap();
        assert_eq!(t.quoted(), "\"curated\".\"transactions\"");
        assert_eq!(t.to_string(), "curated.transactions");

        let t = TableName::parse("events").unwrap();
        assert_eq!(t.schema_or_default(), "main");
        assert_eq!(t.quoted(), "\"events\"");

        assert!(TableName::parse("a.b.c").is_err());
        assert!(TableName::parse(".x").is_err());
        assert!(TableName::parse("").is_err());
    }

    #[test]
    fn test_duckdb_value_to_json() {
        assert_eq!(duckdb_value_to_json(DbValue::Null), Value::Null);
        assert_eq!(
            duckdb_value_to_json(DbValue::Boolean(true)),
            Value::Bool(true)
        );
        assert_eq!(
            duckdb_value_to_json(DbValue::Int(42)),
            Value::Number(42.into())
        );
        assert_eq!(
            duckdb_value_to_json(DbValue::Text("hello".to_string())),
            Value::String("hello".to_string())
        );
    }

    #[test]
    fn test_timestamp_and_date_conversion() {
        // 2024-01-01 00:00:00 UTC
        let micros = 1_704_067_200_000_000;
        assert_eq!(
            duckdb_value_to_json(DbValue::Timestamp(TimeUnit::Microsecond, micros)),
            Value::String("2024-01-01T00:00:00".to_string())
        );
        assert_eq!(
            duckdb_value_to_json(DbValue::Timestamp(TimeUnit::Second, 1_704_067_200)),
            Value::String("2024-01-01T00:00:00".to_string())
        );
        assert_eq!(
            duckdb_value_to_json(DbValue::Date32(19_723)),
            Value::String("2024-01-01".to_string())
        );
    }
}
