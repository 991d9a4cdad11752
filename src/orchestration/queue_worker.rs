//! # Queue Worker
//!
//! Polls the handler and batch queues and feeds tasks to the
//! [`TaskProcessor`]. The handler queue is read first on every pass so
//! interactive starts never wait behind a bulk fan-out.
//!
//! A processed task is deleted. A failed task is left for redelivery after
//! its visibility timeout, unless it failed with a query error or has been
//! read `max_processing_attempts` times, in which case it is archived.

use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::task_processor::TaskProcessor;
use crate::config::QueueConfig;
use crate::error::Result;
use crate::logging::log_error;
use crate::messaging::{ReceivedTask, TaskQueue};

pub struct QueueWorker {
    queue: Arc<dyn TaskQueue>,
    processor: Arc<TaskProcessor>,
    config: QueueConfig,
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Counts from one polling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub processed: usize,
    pub failed: usize,
    pub archived: usize,
}

impl PollSummary {
    pub fn received(&self) -> usize {
        self.processed + self.failed
    }
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn TaskQueue>, processor: Arc<TaskProcessor>, config: QueueConfig) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    /// Creates both queues if needed
    pub async fn initialize_queues(&self) -> Result<()> {
        try_join_all(
            [&self.config.handler_queue, &self.config.batch_queue]
                .map(|queue| self.queue.ensure_queue(queue)),
        )
        .await?;
        Ok(())
    }

    /// Polls until `shutdown` flips to true
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.initialize_queues().await?;
        info!(
            handler_queue = %self.config.handler_queue,
            batch_queue = %self.config.batch_queue,
            "Starting queue worker"
        );

        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(summary) => summary.received() == 0,
                Err(e) => {
                    log_error("queue_worker", "poll", &e.to_string(), None);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.config.poll_interval()) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!("Queue worker stopped");
        Ok(())
    }

    /// Reads and processes one round of tasks from each queue
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let mut summary = PollSummary::default();
        for queue in [&self.config.handler_queue, &self.config.batch_queue] {
            let tasks = self
                .queue
                .pop(
                    queue,
                    self.config.read_batch_size,
                    self.config.visibility_timeout_seconds,
                )
                .await?;
            if tasks.is_empty() {
                continue;
            }
            debug!(queue = %queue, count = tasks.len(), "Read tasks");

            for received in tasks {
                self.handle(queue, received, &mut summary).await;
            }
        }
        Ok(summary)
    }

    async fn handle(&self, queue: &str, received: ReceivedTask, summary: &mut PollSummary) {
        let msg_id = received.msg_id;
        match self.processor.process(&received.task).await {
            Ok(_) => {
                summary.processed += 1;
                if let Err(e) = self.queue.ack(queue, msg_id).await {
                    warn!(queue = %queue, msg_id = msg_id, error = %e, "Failed to delete processed task");
                }
            }
            Err(e) => {
                summary.failed += 1;
                let exhausted = received.read_count >= self.config.max_processing_attempts;
                log_error(
                    "queue_worker",
                    &received.task.task_type,
                    &e.to_string(),
                    Some(&format!(
                        "queue={queue} msg_id={msg_id} read_count={}",
                        received.read_count
                    )),
                );

                if e.is_query_error() || exhausted {
                    match self.queue.archive(queue, msg_id).await {
                        Ok(()) => summary.archived += 1,
                        Err(archive_err) => warn!(
                            queue = %queue,
                            msg_id = msg_id,
                            error = %archive_err,
                            "Failed to archive task"
                        ),
                    }
                }
            }
        }
    }
}
