//! # Task Processor
//!
//! Decodes queued tasks into a closed set of payloads and hands each to the
//! component that owns it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::batch_executor::{BatchExecutor, BatchResult};
use super::smart_groups::SmartGroupReconciler;
use super::start_batcher::{BatchingOutcome, StartBatcher};
use crate::assets::AssetCache;
use crate::constants::task_types;
use crate::error::{MailroomError, Result};
use crate::messaging::{MessagingError, MessagingResult, QueuedTask};
use crate::models::{FlowStartBatch, GroupId, OrgId, StartId};
use crate::store::FlowStartStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartFlowTask {
    pub start_id: StartId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulateGroupTask {
    pub group_id: GroupId,
    /// Overrides the group's stored query, e.g. right after it was edited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    StartFlow(StartFlowTask),
    StartFlowBatch(FlowStartBatch),
    StartIvrFlowBatch(FlowStartBatch),
    PopulateDynamicGroup(PopulateGroupTask),
}

impl TaskPayload {
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::StartFlow(_) => task_types::START_FLOW,
            Self::StartFlowBatch(_) => task_types::START_FLOW_BATCH,
            Self::StartIvrFlowBatch(_) => task_types::START_IVR_FLOW_BATCH,
            Self::PopulateDynamicGroup(_) => task_types::POPULATE_DYNAMIC_GROUP,
        }
    }

    pub fn from_task(task: &QueuedTask) -> Result<Self> {
        let payload = task.payload.clone();
        let decoded = match task.task_type.as_str() {
            task_types::START_FLOW => Self::StartFlow(serde_json::from_value(payload)?),
            task_types::START_FLOW_BATCH => Self::StartFlowBatch(serde_json::from_value(payload)?),
            task_types::START_IVR_FLOW_BATCH => {
                Self::StartIvrFlowBatch(serde_json::from_value(payload)?)
            }
            task_types::POPULATE_DYNAMIC_GROUP => {
                Self::PopulateDynamicGroup(serde_json::from_value(payload)?)
            }
            other => return Err(MessagingError::unknown_task_type(other).into()),
        };
        Ok(decoded)
    }

    pub fn to_task(&self, org_id: OrgId) -> MessagingResult<QueuedTask> {
        match self {
            Self::StartFlow(t) => QueuedTask::new(self.task_type(), org_id, t),
            Self::StartFlowBatch(b) | Self::StartIvrFlowBatch(b) => {
                QueuedTask::new(self.task_type(), org_id, b)
            }
            Self::PopulateDynamicGroup(t) => QueuedTask::new(self.task_type(), org_id, t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Batched(BatchingOutcome),
    BatchProcessed(BatchResult),
    GroupPopulated { group_id: GroupId, matched: usize },
}

pub struct TaskProcessor {
    assets: Arc<AssetCache>,
    starts: Arc<dyn FlowStartStore>,
    batcher: Arc<StartBatcher>,
    executor: Arc<BatchExecutor>,
    reconciler: Arc<SmartGroupReconciler>,
}

impl std::fmt::Debug for TaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProcessor")
            .field("batcher", &self.batcher)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl TaskProcessor {
    pub fn new(
        assets: Arc<AssetCache>,
        starts: Arc<dyn FlowStartStore>,
        batcher: Arc<StartBatcher>,
        executor: Arc<BatchExecutor>,
        reconciler: Arc<SmartGroupReconciler>,
    ) -> Self {
        Self {
            assets,
            starts,
            batcher,
            executor,
            reconciler,
        }
    }

    #[instrument(skip(self, task), fields(task_type = %task.task_type, org_id = %task.org_id))]
    pub async fn process(&self, task: &QueuedTask) -> Result<TaskOutcome> {
        let payload = TaskPayload::from_task(task)?;
        debug!("Processing task");

        match payload {
            TaskPayload::StartFlow(StartFlowTask { start_id }) => {
                let start = self
                    .starts
                    .find_start(start_id)
                    .await?
                    .filter(|s| s.org_id == task.org_id)
                    .ok_or_else(|| MailroomError::not_found("flow start", start_id))?;
                let assets = self.assets.get(start.org_id).await?;
                let outcome = self.batcher.create_flow_batches(&assets, &start).await?;
                Ok(TaskOutcome::Batched(outcome))
            }
            TaskPayload::StartFlowBatch(batch) | TaskPayload::StartIvrFlowBatch(batch) => {
                let result = self.executor.start_flow_batch(&batch).await?;
                Ok(TaskOutcome::BatchProcessed(result))
            }
            TaskPayload::PopulateDynamicGroup(PopulateGroupTask { group_id, query }) => {
                let assets = self.assets.get(task.org_id).await?;
                let group = assets
                    .group_by_id(group_id)
                    .ok_or_else(|| MailroomError::not_found("group", group_id))?;
                let query = query.unwrap_or_else(|| group.query.clone());
                if query.is_empty() {
                    return Err(MailroomError::not_found("smart group", group_id));
                }
                let matched = self
                    .reconciler
                    .populate_smart_group(&assets, group, &query)
                    .await?;
                Ok(TaskOutcome::GroupPopulated { group_id, matched })
            }
        }
    }
}
