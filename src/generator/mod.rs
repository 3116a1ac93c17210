//! Answer generation collaborators.
//!
//! The dispatcher only sees the [`AnswerGenerator`] trait; the concrete
//! generator is constructed in `main` and injected.

pub mod openai;

use std::future::Future;
use std::pin::Pin;

use crate::models::HistoryEntry;
use crate::Result;

pub use openai::OpenAiGenerator;

/// Produces an answer for a query given the sender's recent history.
pub trait AnswerGenerator: Send + Sync {
    /// Generate the answer text.
    ///
    /// `history` is ordered oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Generation` if no answer could be produced.
    fn generate<'a>(
        &'a self,
        query: &'a str,
        history: &'a [HistoryEntry],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}
