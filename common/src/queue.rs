//! # Queue Gateway
//!
//! Three independent FIFO-ish work queues (`validation`, `transfer`,
//! `cleanup`) backed by a single Postgres table, distinguished by a `queue`
//! column. Dequeue claims rows with `SELECT ... FOR UPDATE SKIP LOCKED` so
//! concurrent workers never double-claim a message, then stamps a
//! visibility deadline and a fresh pop-receipt. A message that isn't
//! deleted before its deadline simply becomes selectable again.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::GatewayError;

/// A message dequeued from a `Queue`.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub pop_receipt: Uuid,
    pub body: String,
    pub dequeue_count: i32,
}

/// The Queue Gateway, scoped to a single named queue.
#[derive(Clone)]
pub struct Queue {
    pool: PgPool,
    name: String,
}

impl Queue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message carrying `body` (the canonical path of a Payload
    /// Object). Returns the new message id.
    pub async fn enqueue(&self, body: &str) -> Result<i64, GatewayError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO work_queue (queue, body) VALUES ($1, $2) RETURNING id",
        )
        .bind(&self.name)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Claim up to `n` visible messages, hiding them from other consumers
    /// for `visibility`.
    pub async fn dequeue(&self, n: i64, visibility: Duration) -> Result<Vec<Message>, GatewayError> {
        let visibility_secs = visibility.as_secs() as f64;

        let rows: Vec<(i64, Uuid, String, i32)> = sqlx::query_as(
            r#"
            WITH claimed AS (
                SELECT id
                FROM work_queue
                WHERE queue = $1 AND visible_at <= NOW()
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE work_queue
            SET
                pop_receipt = gen_random_uuid(),
                visible_at = NOW() + make_interval(secs => $3),
                dequeue_count = work_queue.dequeue_count + 1
            FROM claimed
            WHERE work_queue.id = claimed.id
            RETURNING work_queue.id, work_queue.pop_receipt, work_queue.body, work_queue.dequeue_count
            "#,
        )
        .bind(&self.name)
        .bind(n)
        .bind(visibility_secs)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, pop_receipt, body, dequeue_count)| Message {
                id,
                pop_receipt,
                body,
                dequeue_count,
            })
            .collect())
    }

    /// Acknowledge (remove) a message. Idempotent: if the id/pop-receipt
    /// pair no longer matches a row (already deleted, or claimed by
    /// someone else since), this returns `NotFound` rather than erroring —
    /// callers treat that as "nothing left to do" rather than retrying.
    pub async fn delete(&self, id: i64, pop_receipt: Uuid) -> Result<(), GatewayError> {
        let result = sqlx::query(
            "DELETE FROM work_queue WHERE id = $1 AND queue = $2 AND pop_receipt = $3",
        )
        .bind(id)
        .bind(&self.name)
        .bind(pop_receipt)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!(
                "message {id} in queue {} not found or pop receipt stale",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(unused_imports)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test(migrations = "../migrations")]
    async fn dequeue_hides_message_until_visibility_expires(db: PgPool) {
        let queue = Queue::new(db, "transfer");
        queue.enqueue("VESSEL001/data_20250101_1.bin").await.unwrap();

        let first = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
        assert!(second.is_empty(), "still-visible message was claimed twice");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn dequeue_only_claims_from_its_own_queue(db: PgPool) {
        let transfer = Queue::new(db.clone(), "transfer");
        let cleanup = Queue::new(db, "cleanup");

        transfer.enqueue("VESSEL001/data_20250101_1.bin").await.unwrap();

        let claimed = cleanup.dequeue(10, Duration::from_secs(30)).await.unwrap();
        assert!(claimed.is_empty());

        let claimed = transfer.dequeue(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn dequeue_respects_batch_size(db: PgPool) {
        let queue = Queue::new(db, "validation");
        for i in 0..5 {
            queue
                .enqueue(&format!("VESSEL001/data_20250101_{i}.bin"))
                .await
                .unwrap();
        }

        let claimed = queue.dequeue(3, Duration::from_secs(30)).await.unwrap();
        assert_eq!(claimed.len(), 3);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn delete_is_idempotent_on_stale_pop_receipt(db: PgPool) {
        let queue = Queue::new(db, "cleanup");
        queue.enqueue("VESSEL001/data_20250101_1.bin").await.unwrap();

        let claimed = queue.dequeue(1, Duration::from_secs(30)).await.unwrap();
        let message = &claimed[0];

        queue.delete(message.id, message.pop_receipt).await.unwrap();

        let result = queue.delete(message.id, message.pop_receipt).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn redequeue_increments_dequeue_count(db: PgPool) {
        let queue = Queue::new(db, "validation");
        queue.enqueue("VESSEL001/data_20250101_1.bin").await.unwrap();

        let first = queue.dequeue(1, Duration::from_millis(0)).await.unwrap();
        assert_eq!(first[0].dequeue_count, 1);

        let second = queue.dequeue(1, Duration::from_secs(30)).await.unwrap();
        assert_eq!(second[0].dequeue_count, 2);
    }
}
