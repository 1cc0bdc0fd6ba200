//! Error types for the queue.

/// Result type alias using [`QueueError`].
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur in queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The backing database failed.
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A message body could not be serialized or deserialized.
    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violation.
    #[error("queue internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
