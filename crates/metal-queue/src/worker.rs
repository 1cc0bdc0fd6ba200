//! The consumer worker loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::message::{Outcome, QueueMessage};
use crate::{produce_delayed, DurableQueue};

/// How long a worker sleeps after finding its queue empty.
pub const POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Error type handlers surface to the worker loop.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A message handler.
///
/// The handler runs with a deadline of the queue's visibility timeout; work
/// that outruns it is abandoned mid-flight and the message reappears for
/// another worker, so every step must be idempotent. Returning `Err` is a
/// soft failure with the same effect.
#[async_trait]
pub trait Handler<M: QueueMessage>: Send + Sync {
    async fn handle(&self, message: M) -> Result<Outcome<M>, HandlerError>;
}

/// One consumer loop over a single queue.
pub struct Worker {
    queue: Arc<dyn DurableQueue>,
    visibility_timeout: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    /// Create a worker over the given backend.
    #[must_use]
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        visibility_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            visibility_timeout,
            shutdown,
        }
    }

    /// Run the consumer loop until the shutdown token is cancelled.
    ///
    /// The loop never returns an error: backend failures are logged and
    /// retried after the poll back-off, and handler failures leave the
    /// message to reappear after its visibility timeout.
    pub async fn run<M, H>(&self, handler: H)
    where
        M: QueueMessage,
        H: Handler<M>,
    {
        info!(queue = M::QUEUE, "worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let envelope = match self.queue.read(M::QUEUE, self.visibility_timeout).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    self.idle().await;
                    continue;
                }
                Err(e) => {
                    error!(queue = M::QUEUE, error = %e, "queue read failed");
                    self.idle().await;
                    continue;
                }
            };

            let message: M = match serde_json::from_value(envelope.body.clone()) {
                Ok(message) => message,
                Err(e) => {
                    // A body that can't decode will never succeed; archive it
                    // rather than letting it reappear forever.
                    error!(
                        queue = M::QUEUE,
                        message_id = %envelope.id,
                        error = %e,
                        "discarding undecodable message"
                    );
                    if let Err(e) = self.queue.archive(&envelope.id).await {
                        error!(message_id = %envelope.id, error = %e, "archive failed");
                    }
                    continue;
                }
            };

            debug!(
                queue = M::QUEUE,
                message_id = %envelope.id,
                delivery_count = envelope.delivery_count,
                "handling message"
            );

            match tokio::time::timeout(self.visibility_timeout, handler.handle(message)).await {
                Ok(Ok(outcome)) => self.dispatch(&envelope.id, outcome).await,
                Ok(Err(e)) => {
                    // Soft failure: the message reappears after the
                    // visibility timeout.
                    warn!(
                        queue = M::QUEUE,
                        message_id = %envelope.id,
                        error = %e,
                        "handler failed; message will be redelivered"
                    );
                }
                Err(_) => {
                    warn!(
                        queue = M::QUEUE,
                        message_id = %envelope.id,
                        timeout = ?self.visibility_timeout,
                        "handler exceeded its deadline; message will be redelivered"
                    );
                }
            }
        }

        info!(queue = M::QUEUE, "worker stopped");
    }

    async fn dispatch<M: QueueMessage>(&self, message_id: &str, outcome: Outcome<M>) {
        match outcome {
            Outcome::Done => {
                if let Err(e) = self.queue.archive(message_id).await {
                    error!(message_id = %message_id, error = %e, "archive failed");
                }
            }
            Outcome::Requeue { message, delay } => {
                match produce_delayed(self.queue.as_ref(), &message, delay).await {
                    Ok(()) => {
                        if let Err(e) = self.queue.archive(message_id).await {
                            error!(message_id = %message_id, error = %e, "archive failed");
                        }
                    }
                    Err(e) => {
                        // Leave the original to reappear; requeueing again is
                        // harmless because handlers are idempotent.
                        error!(message_id = %message_id, error = %e, "requeue failed");
                    }
                }
            }
            Outcome::Fatal { reason } => {
                warn!(message_id = %message_id, reason = %reason, "message abandoned");
                if let Err(e) = self.queue.archive(message_id).await {
                    error!(message_id = %message_id, error = %e, "archive failed");
                }
            }
        }
    }

    async fn idle(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = tokio::time::sleep(POLL_BACKOFF) => {}
        }
    }
}
