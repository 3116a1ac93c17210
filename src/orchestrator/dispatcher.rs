//! Batch dispatcher draining the request queue.
//!
//! The control loop pulls at most `batch_size` items while the overload gate
//! is open, runs one task per item, and waits for the whole batch before
//! pulling again. Each item moves through
//! `queued → generating → {notifying ∥ persisting} → done`; a failure at any
//! step ends that item only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::executor::GenerationExecutor;
use crate::config::DispatcherConfig;
use crate::generator::AnswerGenerator;
use crate::models::WorkItem;
use crate::monitor::ResourceMonitor;
use crate::notifier::Notifier;
use crate::persistence::ConversationStore;
use crate::queue::RequestQueue;
use crate::Result;

/// External collaborators each work item talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Produces answers.
    pub generator: Arc<dyn AnswerGenerator>,
    /// Delivers answers.
    pub notifier: Arc<dyn Notifier>,
    /// Supplies history and records exchanges.
    pub store: Arc<dyn ConversationStore>,
}

/// State shared by the control loop and every item task.
struct Shared {
    collaborators: Collaborators,
    executor: Arc<GenerationExecutor>,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight count when an item task ends, however it ends.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resource-aware worker draining a [`RequestQueue`].
pub struct Dispatcher {
    queue: RequestQueue,
    monitor: Arc<ResourceMonitor>,
    config: DispatcherConfig,
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Wire a dispatcher to its queue, gate, collaborators, and executor.
    #[must_use]
    pub fn new(
        queue: RequestQueue,
        monitor: Arc<ResourceMonitor>,
        collaborators: Collaborators,
        executor: Arc<GenerationExecutor>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            monitor,
            config,
            shared: Arc::new(Shared {
                collaborators,
                executor,
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of item tasks currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Run the control loop until `cancel` fires.
    ///
    /// Cancellation is observed between batches; a batch that has started
    /// always runs to completion.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!(batch_size = self.config.batch_size, "dispatcher started");
        while !cancel.is_cancelled() {
            let pause = if self.monitor.is_overloaded().await {
                debug!(queued = self.queue.len(), "host overloaded; dispatch paused");
                Some(self.config.overload_backoff())
            } else if self.run_batch().await == 0 {
                Some(self.config.idle_backoff())
            } else {
                None
            };

            if let Some(pause) = pause {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }
        info!(remaining = self.queue.len(), "dispatcher stopped");
    }

    /// Pull up to `batch_size` items, process them concurrently, and wait
    /// for all of them. Returns the number of items pulled.
    pub async fn run_batch(&self) -> usize {
        let mut tasks = JoinSet::new();
        while tasks.len() < self.config.batch_size {
            let Some(item) = self.queue.dequeue() else {
                break;
            };
            let span = info_span!("work_item", item_id = %item.id, sender_id = %item.sender_id);
            let shared = Arc::clone(&self.shared);
            tasks.spawn(
                async move {
                    let _guard = InFlight::enter(&shared.in_flight);
                    if let Err(err) = process_item(&shared, &item).await {
                        error!(%err, sender_id = %item.sender_id, "error processing request");
                    }
                }
                .instrument(span),
            );
        }

        let pulled = tasks.len();
        if pulled > 0 {
            debug!(batch = pulled, "batch dispatched");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(%err, "work item task aborted");
            }
        }
        pulled
    }
}

/// Generate, then deliver and persist concurrently.
///
/// Only generation failures are returned; delivery and persistence
/// failures are logged here so that one never hides the other.
async fn process_item(shared: &Shared, item: &WorkItem) -> Result<()> {
    let Collaborators {
        generator,
        notifier,
        store,
    } = &shared.collaborators;

    let history = match store.recent_history(&item.sender_id).await {
        Ok(history) => history,
        Err(err) => {
            warn!(%err, "history lookup failed; answering without context");
            Vec::new()
        }
    };

    let answer = {
        let generator = Arc::clone(generator);
        let query = item.query.clone();
        shared
            .executor
            .submit(async move { generator.generate(&query, &history).await })
            .await?
    };

    let (sent, stored) = tokio::join!(
        notifier.send(&answer, &item.sender_id),
        store.record(&item.sender_id, &item.query, &answer),
    );

    match sent {
        Ok(()) => debug!("answer delivered"),
        Err(err) => error!(%err, "failed to deliver answer"),
    }
    match stored {
        Ok(true) => debug!("exchange recorded"),
        Ok(false) => warn!("exchange not recorded; no database connection available"),
        Err(err) => error!(%err, "failed to record exchange"),
    }
    Ok(())
}
