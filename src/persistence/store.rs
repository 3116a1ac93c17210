//! Conversation store seam between the dispatcher and persistence.

use std::future::Future;
use std::pin::Pin;

use crate::models::HistoryEntry;
use crate::Result;

/// What the dispatcher needs from persistence.
///
/// [`QueryRepo`](super::QueryRepo) is the production implementation; tests
/// substitute in-memory fakes.
pub trait ConversationStore: Send + Sync {
    /// Recent exchanges for `sender_id`, oldest first.
    ///
    /// A pool timeout yields an empty history rather than an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup fails.
    fn recent_history<'a>(
        &'a self,
        sender_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<HistoryEntry>>> + Send + 'a>>;

    /// Record one answered query for `sender_id`, creating the user if needed.
    ///
    /// Returns `Ok(false)` when a pool timeout prevented the write.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any insert fails.
    fn record<'a>(
        &'a self,
        sender_id: &'a str,
        query: &'a str,
        answer: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}
