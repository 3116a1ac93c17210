//! Query/answer records and the recent-history window.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Maximum rows in the recent-history window.
pub const HISTORY_LIMIT: i64 = 5;

/// How far back the recent-history window reaches.
#[must_use]
pub fn history_window() -> Duration {
    Duration::hours(2)
}

/// An answered query, stored append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRecord {
    /// Database-generated identifier.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Question text as received.
    pub query: String,
    /// Generated answer.
    pub answer: String,
    /// Insert timestamp.
    pub created_at: DateTime<Utc>,
}

/// One prior exchange supplied to the answer generator as context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Earlier question.
    pub query: String,
    /// Answer given to it.
    pub answer: String,
    /// When the exchange was recorded.
    pub created_at: DateTime<Utc>,
}

/// Render a timestamp in the fixed-width form stored in the database.
///
/// Every stored value has the same width and a `Z` suffix, so comparing the
/// text compares the instants.
#[must_use]
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
///
/// # Errors
///
/// Returns `AppError::Db` if the text is not RFC 3339.
pub fn parse_db_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid timestamp {raw:?}: {err}")))
}
