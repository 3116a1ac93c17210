//! Message sender model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sender known to the system.
///
/// Created lazily on the first message from a new `external_id` and never
/// modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Database-generated identifier.
    pub id: i64,
    /// Caller-supplied sender identifier.
    pub external_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
