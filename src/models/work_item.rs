//! Inbound work item model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inbound text request waiting for an answer.
///
/// Created by the ingress adapter, enqueued once and dequeued at most once.
/// Work items are never persisted; an item dequeued but not finished when
/// the process dies is lost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    /// Correlation identifier used in logs.
    pub id: Uuid,
    /// Caller-supplied sender identifier (`WhatsApp` phone number id).
    pub sender_id: String,
    /// Question text.
    pub query: String,
    /// When the ingress adapter accepted the message.
    pub received_at: DateTime<Utc>,
}

impl WorkItem {
    /// Construct a new work item stamped with the current time.
    #[must_use]
    pub fn new(sender_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id: sender_id.into(),
            query: query.into(),
            received_at: Utc::now(),
        }
    }
}
