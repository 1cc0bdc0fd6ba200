//! PostgreSQL queue backend.
//!
//! One table holds every queue. Reads use `FOR UPDATE SKIP LOCKED` so
//! competing workers never hand out the same message twice, and the
//! visibility window is a plain timestamp comparison so an expired hold
//! needs no reaper process.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::QueueResult;
use crate::message::Envelope;
use crate::DurableQueue;

/// PostgreSQL-backed queue.
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
}

impl PostgresQueue {
    /// Create a queue over an existing connection pool (shared with the
    /// store). The required table is created if it doesn't exist.
    pub async fn from_pool(pool: PgPool) -> QueueResult<Self> {
        let queue = Self { pool };
        queue.ensure_schema().await?;
        Ok(queue)
    }

    async fn ensure_schema(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                body JSONB NOT NULL,
                available_at TIMESTAMPTZ NOT NULL,
                invisible_until TIMESTAMPTZ,
                archived_at TIMESTAMPTZ,
                delivery_count INTEGER NOT NULL DEFAULT 0,
                enqueued_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_messages_read
            ON queue_messages (queue, available_at)
            WHERE archived_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn enqueue(
        &self,
        queue: &str,
        body: serde_json::Value,
        delay: Duration,
    ) -> QueueResult<()> {
        let delay_secs = delay.as_secs_f64();
        sqlx::query(
            "INSERT INTO queue_messages (id, queue, body, available_at, enqueued_at) \
             VALUES ($1, $2, $3, NOW() + make_interval(secs => $4), NOW())",
        )
        .bind(ulid::Ulid::new().to_string().to_lowercase())
        .bind(queue)
        .bind(&body)
        .bind(delay_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DurableQueue for PostgresQueue {
    async fn produce_raw(&self, queue: &str, body: serde_json::Value) -> QueueResult<()> {
        self.enqueue(queue, body, Duration::ZERO).await
    }

    async fn produce_raw_delayed(
        &self,
        queue: &str,
        body: serde_json::Value,
        delay: Duration,
    ) -> QueueResult<()> {
        self.enqueue(queue, body, delay).await
    }

    async fn read(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<Envelope>> {
        let timeout_secs = visibility_timeout.as_secs_f64();

        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET invisible_until = NOW() + make_interval(secs => $2),
                delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue = $1
                  AND archived_at IS NULL
                  AND available_at <= NOW()
                  AND (invisible_until IS NULL OR invisible_until <= NOW())
                ORDER BY available_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue, body, delivery_count, enqueued_at
            "#,
        )
        .bind(queue)
        .bind(timeout_secs)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Envelope {
            id: r.get("id"),
            queue: r.get("queue"),
            body: r.get("body"),
            delivery_count: u32::try_from(r.get::<i32, _>("delivery_count")).unwrap_or(0),
            enqueued_at: r.get("enqueued_at"),
        }))
    }

    async fn archive(&self, id: &str) -> QueueResult<()> {
        sqlx::query(
            "UPDATE queue_messages SET archived_at = NOW() WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn produce_read_archive() {
        let url = get_database_url().expect("DATABASE_URL not set");
        let pool = PgPool::connect(&url).await.expect("connect");
        let queue = PostgresQueue::from_pool(pool).await.expect("queue");

        let name = format!("test-{}", ulid::Ulid::new().to_string().to_lowercase());
        queue
            .produce_raw(&name, serde_json::json!({"n": 1}))
            .await
            .expect("produce");

        let envelope = queue
            .read(&name, Duration::from_secs(30))
            .await
            .expect("read")
            .expect("message");
        assert_eq!(envelope.delivery_count, 1);

        let hidden = queue
            .read(&name, Duration::from_secs(30))
            .await
            .expect("read");
        assert!(hidden.is_none());

        queue.archive(&envelope.id).await.expect("archive");
    }
}
