//! Outbound message delivery collaborators.

pub mod whatsapp;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

pub use whatsapp::WhatsAppNotifier;

/// Delivers an answer to a recipient.
pub trait Notifier: Send + Sync {
    /// Send `message` to `recipient`. Failures are reported, not retried.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notify` if delivery fails.
    fn send<'a>(
        &'a self,
        message: &'a str,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
