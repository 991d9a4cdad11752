//! # Orchestration
//!
//! The audience resolution and flow start pipeline.
//!
//! ## Core Components
//!
//! - **RecipientResolver**: audience description to deduplicated contact ids
//! - **SmartGroupReconciler**: materializes query-defined group membership
//! - **StartBatcher**: resolves a flow start and queues its batches
//! - **BatchExecutor**: runs a batch through the external flow engine
//! - **TaskProcessor** / **QueueWorker**: task dispatch and queue polling

pub mod batch_executor;
pub mod queue_worker;
pub mod recipients;
pub mod smart_groups;
pub mod start_batcher;
pub mod task_processor;

pub use batch_executor::{
    BatchExecutor, BatchResult, ContactOutcome, ContactResult, FlowEngine, FlowRun,
    FlowStartContext, FlowTrigger,
};
pub use queue_worker::{PollSummary, QueueWorker};
pub use recipients::{RecipientResolver, ResolvedRecipients};
pub use smart_groups::{MembershipDiff, SmartGroupReconciler};
pub use start_batcher::{BatchRoute, BatchingOutcome, StartBatcher, StartBatcherConfig};
pub use task_processor::{
    PopulateGroupTask, StartFlowTask, TaskOutcome, TaskPayload, TaskProcessor,
};
