//! Unbounded FIFO of inbound work items.
//!
//! Every operation takes one coarse lock and returns immediately. There is
//! no capacity bound, acknowledgement, or redelivery: the overload gate in
//! the dispatcher throttles how fast items leave the queue, not how fast
//! they arrive.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::models::WorkItem;

/// Cloneable handle to a shared FIFO of [`WorkItem`]s.
#[derive(Debug, Clone, Default)]
pub struct RequestQueue {
    inner: Arc<Mutex<VecDeque<WorkItem>>>,
}

impl RequestQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item at the tail.
    pub fn enqueue(&self, item: WorkItem) {
        let mut items = self.lock();
        debug!(item_id = %item.id, sender_id = %item.sender_id, "work item enqueued");
        items.push_back(item);
    }

    /// Remove and return the head, or `None` when the queue is empty.
    #[must_use]
    pub fn dequeue(&self) -> Option<WorkItem> {
        self.lock().pop_front()
    }

    /// Snapshot of the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
