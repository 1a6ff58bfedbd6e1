//! Database model types.

use chrono::{DateTime, Utc};

/// A row of the `targets` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTarget {
    pub id: String,
    pub url: String,
    pub method: String,
    pub match_regexp: Option<String>,
}

/// A row of the `results` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub target_id: String,
    pub elapsed_seconds: f64,
    pub status: Option<u16>,
    pub matched: Option<bool>,
    pub unreachable: bool,
    pub at: DateTime<Utc>,
}
