//! In-memory queue backend for testing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{QueueError, QueueResult};
use crate::message::Envelope;
use crate::DurableQueue;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    queue: String,
    body: serde_json::Value,
    available_at: DateTime<Utc>,
    invisible_until: Option<DateTime<Utc>>,
    archived: bool,
    delivery_count: u32,
    enqueued_at: DateTime<Utc>,
}

/// In-memory queue. Messages are lost when the process exits; only suitable
/// for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryQueue {
    /// Create a new empty in-memory queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unarchived messages on the given queue, visible or not.
    pub async fn pending_count(&self, queue: &str) -> usize {
        let messages = self.messages.lock().await;
        messages
            .iter()
            .filter(|m| m.queue == queue && !m.archived)
            .count()
    }

    /// Number of archived messages on the given queue.
    pub async fn archived_count(&self, queue: &str) -> usize {
        let messages = self.messages.lock().await;
        messages
            .iter()
            .filter(|m| m.queue == queue && m.archived)
            .count()
    }

    async fn enqueue(&self, queue: &str, body: serde_json::Value, delay: Duration) {
        let now = Utc::now();
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let mut messages = self.messages.lock().await;
        messages.push(StoredMessage {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            queue: queue.to_owned(),
            body,
            available_at: now + delay,
            invisible_until: None,
            archived: false,
            delivery_count: 0,
            enqueued_at: now,
        });
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn produce_raw(&self, queue: &str, body: serde_json::Value) -> QueueResult<()> {
        self.enqueue(queue, body, Duration::ZERO).await;
        Ok(())
    }

    async fn produce_raw_delayed(
        &self,
        queue: &str,
        body: serde_json::Value,
        delay: Duration,
    ) -> QueueResult<()> {
        self.enqueue(queue, body, delay).await;
        Ok(())
    }

    async fn read(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<Envelope>> {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(visibility_timeout)
            .map_err(|e| QueueError::internal(format!("visibility timeout out of range: {e}")))?;

        let mut messages = self.messages.lock().await;
        let message = messages.iter_mut().find(|m| {
            m.queue == queue
                && !m.archived
                && m.available_at <= now
                && m.invisible_until.is_none_or(|until| until <= now)
        });

        match message {
            Some(m) => {
                m.invisible_until = Some(now + timeout);
                m.delivery_count += 1;
                Ok(Some(Envelope {
                    id: m.id.clone(),
                    queue: m.queue.clone(),
                    body: m.body.clone(),
                    delivery_count: m.delivery_count,
                    enqueued_at: m.enqueued_at,
                }))
            }
            None => Ok(None),
        }
    }

    async fn archive(&self, id: &str) -> QueueResult<()> {
        let mut messages = self.messages.lock().await;
        if let Some(m) = messages.iter_mut().find(|m| m.id == id) {
            m.archived = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_marks_invisible() {
        let queue = MemoryQueue::new();
        queue
            .produce_raw("work", serde_json::json!({"n": 1}))
            .await
            .expect("produce");

        let first = queue
            .read("work", Duration::from_secs(30))
            .await
            .expect("read");
        assert!(first.is_some());

        let second = queue
            .read("work", Duration::from_secs(30))
            .await
            .expect("read");
        assert!(second.is_none(), "invisible message must not be re-read");
    }

    #[tokio::test]
    async fn message_reappears_after_visibility_timeout() {
        let queue = MemoryQueue::new();
        queue
            .produce_raw("work", serde_json::json!({"n": 1}))
            .await
            .expect("produce");

        let first = queue
            .read("work", Duration::from_millis(20))
            .await
            .expect("read")
            .expect("message");

        tokio::time::sleep(Duration::from_millis(40)).await;

        let second = queue
            .read("work", Duration::from_secs(30))
            .await
            .expect("read")
            .expect("message should reappear");
        assert_eq!(second.id, first.id);
        assert_eq!(second.delivery_count, 2);
    }

    #[tokio::test]
    async fn archived_message_is_gone() {
        let queue = MemoryQueue::new();
        queue
            .produce_raw("work", serde_json::json!({"n": 1}))
            .await
            .expect("produce");

        let envelope = queue
            .read("work", Duration::from_millis(10))
            .await
            .expect("read")
            .expect("message");
        queue.archive(&envelope.id).await.expect("archive");

        tokio::time::sleep(Duration::from_millis(30)).await;
        let again = queue
            .read("work", Duration::from_secs(30))
            .await
            .expect("read");
        assert!(again.is_none());
        assert_eq!(queue.archived_count("work").await, 1);
    }

    #[tokio::test]
    async fn delayed_message_not_immediately_visible() {
        let queue = MemoryQueue::new();
        queue
            .produce_raw_delayed("work", serde_json::json!({"n": 1}), Duration::from_millis(50))
            .await
            .expect("produce");

        let early = queue
            .read("work", Duration::from_secs(30))
            .await
            .expect("read");
        assert!(early.is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let later = queue
            .read("work", Duration::from_secs(30))
            .await
            .expect("read");
        assert!(later.is_some());
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let queue = MemoryQueue::new();
        queue
            .produce_raw("a", serde_json::json!({}))
            .await
            .expect("produce");

        let other = queue
            .read("b", Duration::from_secs(30))
            .await
            .expect("read");
        assert!(other.is_none());
    }
}
