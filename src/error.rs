/// Errors raised by a queue backend.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue could not be reached at startup. A flusher built without a
    /// queue is inert until the process restarts.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// A single queue operation failed. Callers treat this as transient.
    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Failed to encode queue payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A queued payload that does not decode into a well-formed usage entry.
#[derive(Debug, thiserror::Error)]
#[error("Malformed usage entry: {0}")]
pub struct EntryParseError(#[from] serde_json::Error);

/// Errors raised while persisting entries.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}
