//! Message envelope and handler outcome types.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A typed message bound to a named queue.
pub trait QueueMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The queue this message type travels on.
    const QUEUE: &'static str;
}

/// A stored message as handed to a worker.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Backend-assigned message id.
    pub id: String,
    /// The queue the message was read from.
    pub queue: String,
    /// Serialized message body.
    pub body: serde_json::Value,
    /// How many times this message has been read.
    pub delivery_count: u32,
    /// When the message was first enqueued.
    pub enqueued_at: DateTime<Utc>,
}

/// What a handler decided about a message.
///
/// Handlers never touch the queue directly; the worker loop dispatches on
/// the returned outcome. Returning an `Err` instead means a soft failure:
/// the message is left invisible and reappears after the visibility timeout.
#[derive(Debug)]
pub enum Outcome<M> {
    /// The work is finished; archive the message.
    Done,
    /// The work is incomplete; enqueue `message` (typically the input with
    /// progress recorded) after `delay`, then archive the current message.
    Requeue {
        /// The message to re-enqueue.
        message: M,
        /// How long to wait before it becomes available.
        delay: std::time::Duration,
    },
    /// The work can never succeed. Failure state has already been persisted
    /// by the handler; archive the message.
    Fatal {
        /// Why the work was abandoned, for logs.
        reason: String,
    },
}

impl<M> Outcome<M> {
    /// Requeue the given message after `delay`.
    #[must_use]
    pub fn requeue(message: M, delay: std::time::Duration) -> Self {
        Self::Requeue { message, delay }
    }

    /// Abandon the work permanently.
    #[must_use]
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }
}
