//! Watermark types
//!
//! These types are serialized to JSON by the CLI and the trigger server.

use crate::types::RowKey;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Incremental export position of one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Dataset name
    pub dataset: String,
    /// Timestamp of the last delivered row
    pub last_ts: NaiveDateTime,
    /// Id of the last delivered row
    pub last_id: String,
    /// When the watermark was last advanced; `None` for the sentinel
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

impl Watermark {
    /// The minimum watermark for a dataset that has never been exported
    pub fn sentinel(dataset: impl Into<String>) -> Self {
        let key = RowKey::min();
        Self {
            dataset: dataset.into(),
            last_ts: key.ts,
            last_id: key.id,
            updated_at: None,
        }
    }

    /// Position as a row key
    pub fn key(&self) -> RowKey {
        RowKey::new(self.last_ts, self.last_id.clone())
    }

    /// Check if this is the sentinel (nothing delivered yet)
    pub fn is_sentinel(&self) -> bool {
        self.key().is_min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_timestamp;

    #[test]
    fn test_sentinel() {
        let wm = Watermark::sentinel("transactions");
        assert!(wm.is_sentinel());
        assert_eq!(wm.last_id, "");
        assert_eq!(
            wm.last_ts,
            parse_timestamp("1970-01-01 00:00:00").unwrap()
        );
    }

    #[test]
    fn test_key_orders_after_sentinel() {
        let wm = Watermark {
            dataset: "d".to_string(),
            last_ts: parse_timestamp("2024-01-01 00:00:00").unwrap(),
            last_id: "7".to_string(),
            updated_at: None,
        };
        assert!(!wm.is_sentinel());
        assert!(wm.key() > Watermark::sentinel("d").key());
    }

    #[test]
    fn test_serialization() {
        let wm = Watermark::sentinel("d");
        let json = serde_json::to_string(&wm).unwrap();
        let restored: Watermark = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, wm);
    }
}
