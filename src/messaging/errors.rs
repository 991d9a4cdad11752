//! # Messaging Error Types
//!
//! Errors from the work queue layer: queue operations that failed, and
//! envelopes that can't be built or understood.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Task envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Unknown task type: {task_type}")]
    UnknownTaskType { task_type: String },
}

impl MessagingError {
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unknown_task_type(task_type: impl Into<String>) -> Self {
        Self::UnknownTaskType {
            task_type: task_type.into(),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
