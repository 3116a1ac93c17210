//! Dedicated runtime for answer generation.
//!
//! Generation may do heavy local work. Running it on its own bounded
//! multi-thread runtime keeps it off the I/O runtime that serves ingress,
//! pool acquisition, and delivery. [`GenerationExecutor::submit`] is the
//! bridge: it spawns onto the generation runtime and awaits the result from
//! whichever runtime the caller runs on.

use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::info;

use crate::{AppError, Result};

/// Bounded worker-thread pool for answer generation.
pub struct GenerationExecutor {
    runtime: Option<Runtime>,
    threads: usize,
}

impl GenerationExecutor {
    /// Start a runtime with `threads` worker threads.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Executor` if `threads` is zero or the runtime
    /// cannot be built.
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(AppError::Executor(
                "generation executor needs at least one thread".into(),
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("relaybot-generate")
            .enable_all()
            .build()
            .map_err(|err| {
                AppError::Executor(format!("failed to build generation runtime: {err}"))
            })?;
        info!(threads, "generation executor started");
        Ok(Self {
            runtime: Some(runtime),
            threads,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `task` on the generation runtime and await its result.
    ///
    /// # Errors
    ///
    /// Returns the task's own error, or `AppError::Executor` if the task
    /// panicked or the runtime is gone.
    pub async fn submit<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.handle()?.spawn(task);
        handle
            .await
            .map_err(|err| AppError::Executor(format!("generation task failed: {err}")))?
    }

    fn handle(&self) -> Result<&Handle> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .ok_or_else(|| AppError::Executor("generation runtime is shut down".into()))
    }
}

impl Drop for GenerationExecutor {
    fn drop(&mut self) {
        // A blocking shutdown panics when dropped from async code.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
