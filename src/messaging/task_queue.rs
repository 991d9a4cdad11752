//! # Task Queue
//!
//! The work queue contract: tasks carry a type tag, the org they belong to,
//! a JSON payload and a priority, and are consumed by queue name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::MessagingResult;
use crate::models::OrgId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Default,
    High,
}

/// Envelope for one unit of queued work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_type: String,
    pub org_id: OrgId,
    #[serde(default)]
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    pub queued_on: DateTime<Utc>,
}

impl QueuedTask {
    pub fn new<T: Serialize>(
        task_type: impl Into<String>,
        org_id: OrgId,
        payload: &T,
    ) -> MessagingResult<Self> {
        Ok(Self {
            task_type: task_type.into(),
            org_id,
            priority: TaskPriority::Default,
            payload: serde_json::to_value(payload)?,
            queued_on: Utc::now(),
        })
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// A task read from a queue, invisible to other readers until its
/// visibility timeout expires
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedTask {
    pub msg_id: i64,
    /// How many times the message has been read, this read included
    pub read_count: i32,
    pub task: QueuedTask,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Creates the queue if it doesn't exist
    async fn ensure_queue(&self, queue: &str) -> MessagingResult<()>;

    async fn push(&self, queue: &str, task: &QueuedTask) -> MessagingResult<i64>;

    async fn pop(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout_seconds: i32,
    ) -> MessagingResult<Vec<ReceivedTask>>;

    /// Removes a processed task
    async fn ack(&self, queue: &str, msg_id: i64) -> MessagingResult<()>;

    /// Moves a task that can't be processed out of the queue
    async fn archive(&self, queue: &str, msg_id: i64) -> MessagingResult<()>;
}
