//! Joining the long-running background tasks at shutdown.

use tokio::task::JoinHandle;
use tracing::error;

/// Await a background task, logging it if it panicked or was aborted.
///
/// Returns the task's output, or `None` when the task did not finish
/// normally.
pub async fn settle<T>(name: &'static str, handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(output) => Some(output),
        Err(err) if err.is_panic() => {
            error!(task = name, %err, "background task panicked");
            None
        }
        Err(err) => {
            error!(task = name, %err, "background task was cancelled");
            None
        }
    }
}
