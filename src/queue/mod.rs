//! Queue backends the flusher drains.

pub mod memory;
pub mod redis_list;
pub mod sqlite;

pub use memory::MemoryQueue;
pub use redis_list::RedisQueue;
pub use sqlite::SqliteQueue;

use std::sync::Arc;

use crate::config::{QueueBackend, QueueConfig};
use crate::error::QueueError;

/// Result of a successful pop. Paired with `Err(QueueError)` this keeps an
/// empty queue distinct from a failed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    Item(Vec<u8>),
    Empty,
}

/// A shared FIFO of opaque payloads under a single fixed key.
///
/// Implementations must be thread-safe (`Send + Sync`) and pop atomically at
/// the single-item level, so two consumers never receive the same item.
pub trait UsageQueue: Send + Sync {
    /// Remove and return the oldest item still present. Never blocks.
    fn pop_oldest(&self) -> Result<Popped, QueueError>;

    /// Append an item at the newest end.
    fn push(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Number of items currently queued.
    fn len(&self) -> Result<usize, QueueError>;

    fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    /// Get the name of this queue backend.
    fn name(&self) -> &str;
}

impl<T: UsageQueue + ?Sized> UsageQueue for Arc<T> {
    fn pop_oldest(&self) -> Result<Popped, QueueError> {
        (**self).pop_oldest()
    }
    fn push(&self, payload: &[u8]) -> Result<(), QueueError> {
        (**self).push(payload)
    }
    fn len(&self) -> Result<usize, QueueError> {
        (**self).len()
    }
    fn is_empty(&self) -> Result<bool, QueueError> {
        (**self).is_empty()
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Connect to the configured queue backend.
///
/// Returns `QueueError::Unavailable` when the backend is disabled or cannot
/// be opened. The caller decides whether that is fatal.
pub fn connect(config: &QueueConfig) -> Result<Arc<dyn UsageQueue>, QueueError> {
    match config.backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryQueue::new(config.key.clone()))),
        QueueBackend::Sqlite => {
            let queue = SqliteQueue::open(&config.path, config.key.clone())
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            Ok(Arc::new(queue))
        }
        QueueBackend::Redis => Ok(Arc::new(RedisQueue::connect(
            &config.url,
            config.key.clone(),
        )?)),
        QueueBackend::Disabled => Err(QueueError::Unavailable(
            "queue backend is disabled".to_string(),
        )),
    }
}
