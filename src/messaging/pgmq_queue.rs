//! # pgmq Task Queue
//!
//! [`TaskQueue`] backed by PostgreSQL message queues through the pgmq crate.
//! pgmq delivers in enqueue order, so [`TaskPriority`](super::TaskPriority)
//! travels in the envelope for consumers but does not reorder delivery;
//! latency-sensitive work is separated by queue instead.

use async_trait::async_trait;
use pgmq::{types::Message, PGMQueue};
use tracing::{debug, warn};

use super::errors::{MessagingError, MessagingResult};
use super::task_queue::{QueuedTask, ReceivedTask, TaskQueue};

#[derive(Debug, Clone)]
pub struct PgmqTaskQueue {
    pgmq: PGMQueue,
}

impl PgmqTaskQueue {
    /// Creates a queue client sharing an existing connection pool
    pub async fn new_with_pool(pool: sqlx::PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq }
    }
}

#[async_trait]
impl TaskQueue for PgmqTaskQueue {
    async fn ensure_queue(&self, queue: &str) -> MessagingResult<()> {
        self.pgmq
            .create(queue)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "create", e.to_string()))?;
        debug!(queue = %queue, "Queue ready");
        Ok(())
    }

    async fn push(&self, queue: &str, task: &QueuedTask) -> MessagingResult<i64> {
        let msg_id = self
            .pgmq
            .send(queue, task)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "send", e.to_string()))?;

        debug!(
            queue = %queue,
            msg_id = msg_id,
            task_type = %task.task_type,
            org_id = %task.org_id,
            "Task queued"
        );
        Ok(msg_id)
    }

    async fn pop(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout_seconds: i32,
    ) -> MessagingResult<Vec<ReceivedTask>> {
        let limit = i32::try_from(max).unwrap_or(i32::MAX);
        let messages: Vec<Message<serde_json::Value>> = self
            .pgmq
            .read_batch(queue, Some(visibility_timeout_seconds), limit)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "read", e.to_string()))?
            .unwrap_or_default();

        let mut received = Vec::with_capacity(messages.len());
        for message in messages {
            match serde_json::from_value::<QueuedTask>(message.message) {
                Ok(task) => received.push(ReceivedTask {
                    msg_id: message.msg_id,
                    read_count: message.read_ct,
                    task,
                }),
                Err(e) => {
                    // an unreadable envelope can never succeed
                    warn!(
                        queue = %queue,
                        msg_id = message.msg_id,
                        error = %e,
                        "Archiving malformed task envelope"
                    );
                    self.archive(queue, message.msg_id).await?;
                }
            }
        }
        Ok(received)
    }

    async fn ack(&self, queue: &str, msg_id: i64) -> MessagingResult<()> {
        self.pgmq
            .delete(queue, msg_id)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "delete", e.to_string()))?;
        Ok(())
    }

    async fn archive(&self, queue: &str, msg_id: i64) -> MessagingResult<()> {
        self.pgmq
            .archive(queue, msg_id)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "archive", e.to_string()))?;
        Ok(())
    }
}
