//! # Messaging Module
//!
//! Work queue contract and its PostgreSQL message queue (pgmq) backend.

pub mod errors;
pub mod pgmq_queue;
pub mod task_queue;

pub use errors::{MessagingError, MessagingResult};
pub use pgmq_queue::PgmqTaskQueue;
pub use task_queue::{QueuedTask, ReceivedTask, TaskPriority, TaskQueue};
