//! Shared recipient queue.
//!
//! Every worker holds a clone of the same [`RecipientQueue`]. An address
//! pushed once is handed out by [`RecipientQueue::pop_or_empty`] to exactly
//! one caller.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct RecipientQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl RecipientQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-updated deque.
    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, address: impl Into<String>) {
        self.lock().push_back(address.into());
    }

    /// Take the next address, or `None` once the queue is empty.
    pub fn pop_or_empty(&self) -> Option<String> {
        self.lock().pop_front()
    }

    /// Current length. Only a hint under concurrent use.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return everything still queued, in queue order.
    pub fn drain_remaining(&self) -> Vec<String> {
        self.lock().drain(..).collect()
    }
}

impl FromIterator<String> for RecipientQueue {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            inner: Arc::new(Mutex::new(iter.into_iter().collect())),
        }
    }
}
