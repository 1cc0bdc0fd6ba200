//! At-least-once durable message queue.
//!
//! Each message type gets a named queue. A read marks the message invisible
//! for the visibility timeout; archiving happens only after the handler
//! reports success, so a crashed or slow worker loses the message to a
//! competitor instead of losing it entirely. Ordering is not guaranteed and
//! duplicate delivery is expected; every consumer must be idempotent.

mod error;
mod memory;
mod message;
mod postgres;
mod worker;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use message::{Envelope, Outcome, QueueMessage};
pub use postgres::PostgresQueue;
pub use worker::{Handler, HandlerError, Worker};

use std::time::Duration;

use async_trait::async_trait;

/// Raw queue backend operations over serialized message bodies.
///
/// Typed produce/consume wrappers live on [`Worker`] and the free functions
/// in this module; backends only deal in JSON bodies.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Enqueue a message, immediately available.
    async fn produce_raw(&self, queue: &str, body: serde_json::Value) -> QueueResult<()>;

    /// Enqueue a message that becomes available after `delay`.
    async fn produce_raw_delayed(
        &self,
        queue: &str,
        body: serde_json::Value,
        delay: Duration,
    ) -> QueueResult<()>;

    /// Read one available message and mark it invisible for
    /// `visibility_timeout`. Returns `None` when the queue is empty.
    async fn read(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<Envelope>>;

    /// Move a message to the archive. Idempotent.
    async fn archive(&self, id: &str) -> QueueResult<()>;
}

/// Enqueue a typed message on its queue.
pub async fn produce<M: QueueMessage>(queue: &dyn DurableQueue, message: &M) -> QueueResult<()> {
    let body = serde_json::to_value(message)?;
    queue.produce_raw(M::QUEUE, body).await
}

/// Enqueue a typed message that becomes available after `delay`.
pub async fn produce_delayed<M: QueueMessage>(
    queue: &dyn DurableQueue,
    message: &M,
    delay: Duration,
) -> QueueResult<()> {
    let body = serde_json::to_value(message)?;
    queue.produce_raw_delayed(M::QUEUE, body, delay).await
}
