//! In-memory queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::instrument;

use super::{Popped, UsageQueue};
use crate::error::QueueError;

/// In-memory FIFO queue.
///
/// Uses `Arc<Mutex<VecDeque>>` for thread-safe access. Useful when the
/// producer and the flusher live in the same process, and for testing. The
/// queue is Clone and every clone shares the same items.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    key: String,
    inner: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl MemoryQueue {
    /// Create a new empty queue under `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Snapshot of the queued payloads, oldest first.
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

impl UsageQueue for MemoryQueue {
    #[instrument(skip(self), fields(queue = %self.key))]
    fn pop_oldest(&self) -> Result<Popped, QueueError> {
        let mut guard = self.inner.lock().expect("lock poisoned");
        Ok(guard.pop_front().map_or(Popped::Empty, Popped::Item))
    }

    #[instrument(skip(self, payload), fields(queue = %self.key))]
    fn push(&self, payload: &[u8]) -> Result<(), QueueError> {
        let mut guard = self.inner.lock().expect("lock poisoned");
        guard.push_back(payload.to_vec());
        Ok(())
    }

    fn len(&self) -> Result<usize, QueueError> {
        Ok(self.inner.lock().expect("lock poisoned").len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
