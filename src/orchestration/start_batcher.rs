//! # Start Batcher
//!
//! Resolves a pending flow start's audience and fans it out as queued
//! batches.
//!
//! The start is moved to `Starting` with its resolved contact count before
//! anything is queued, so its progress is visible even if fan-out is cut
//! short. A start that resolves to nobody completes immediately.
//!
//! ## Routing
//!
//! - Audiences at or under the handler threshold go to the handler queue at
//!   high priority, larger ones to the batch queue.
//! - Voice flows use the IVR batch task type. Routing is decided once per
//!   start and applies to all of its batches.
//!
//! ## Enqueue failures
//!
//! A batch that fails to enqueue doesn't stop the rest. Its contacts are
//! recorded as dropped on the start, and a start none of whose batches
//! could be queued is failed.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::recipients::RecipientResolver;
use crate::assets::OrgAssets;
use crate::config::{QueueConfig, StartsConfig};
use crate::constants::{queues, system, task_types};
use crate::error::{MailroomError, ResolutionStep, Result};
use crate::logging::log_start_operation;
use crate::messaging::{QueuedTask, TaskPriority, TaskQueue};
use crate::models::{ContactId, ContactIdSet, FlowStart, FlowStartBatch, FlowType};
use crate::state_machine::{StartEvent, StartStatus};
use crate::store::{ContactStore, FlowStartStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartBatcherConfig {
    pub batch_size: usize,
    pub handler_queue_threshold: usize,
    pub batch_queue: String,
    pub handler_queue: String,
}

impl Default for StartBatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: system::START_BATCH_SIZE,
            handler_queue_threshold: system::HANDLER_QUEUE_THRESHOLD,
            batch_queue: queues::BATCH_QUEUE.to_string(),
            handler_queue: queues::HANDLER_QUEUE.to_string(),
        }
    }
}

impl StartBatcherConfig {
    pub fn from_config(starts: &StartsConfig, queue: &QueueConfig) -> Self {
        Self {
            batch_size: starts.batch_size,
            handler_queue_threshold: starts.handler_queue_threshold,
            batch_queue: queue.batch_queue.clone(),
            handler_queue: queue.handler_queue.clone(),
        }
    }
}

/// Where a start's batches go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRoute {
    pub queue: String,
    pub task_type: &'static str,
    pub priority: TaskPriority,
}

/// Result of batching one start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchingOutcome {
    /// Batches were queued
    Queued {
        contact_count: usize,
        batch_count: usize,
        failed_batches: usize,
        dropped_contacts: usize,
        route: BatchRoute,
        status: StartStatus,
    },
    /// The audience was empty and the start was completed
    Empty,
    /// The start had already left `Pending`, nothing was done
    NotPending(StartStatus),
}

pub struct StartBatcher {
    starts: Arc<dyn FlowStartStore>,
    contacts: Arc<dyn ContactStore>,
    recipients: RecipientResolver,
    queue: Arc<dyn TaskQueue>,
    config: StartBatcherConfig,
}

impl std::fmt::Debug for StartBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartBatcher")
            .field("config", &self.config)
            .finish()
    }
}

impl StartBatcher {
    pub fn new(
        starts: Arc<dyn FlowStartStore>,
        contacts: Arc<dyn ContactStore>,
        recipients: RecipientResolver,
        queue: Arc<dyn TaskQueue>,
        config: StartBatcherConfig,
    ) -> Self {
        Self {
            starts,
            contacts,
            recipients,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &StartBatcherConfig {
        &self.config
    }

    /// Queue, task type and priority for a start of `contact_count` contacts
    pub fn route_for(&self, flow_type: FlowType, contact_count: usize) -> BatchRoute {
        let task_type = match flow_type {
            FlowType::Voice => task_types::START_IVR_FLOW_BATCH,
            FlowType::Messaging | FlowType::Background | FlowType::Survey => {
                task_types::START_FLOW_BATCH
            }
        };

        if contact_count <= self.config.handler_queue_threshold {
            BatchRoute {
                queue: self.config.handler_queue.clone(),
                task_type,
                priority: TaskPriority::High,
            }
        } else {
            BatchRoute {
                queue: self.config.batch_queue.clone(),
                task_type,
                priority: TaskPriority::Default,
            }
        }
    }

    /// Resolves the start's audience and queues its batches.
    ///
    /// Query errors fail the start since retrying can't fix them. Other
    /// errors leave it pending and are returned for the queue to retry.
    #[instrument(skip(self, assets, start), fields(start_id = %start.id, org_id = %start.org_id))]
    pub async fn create_flow_batches(
        &self,
        assets: &OrgAssets,
        start: &FlowStart,
    ) -> Result<BatchingOutcome> {
        if start.status != StartStatus::Pending {
            warn!(status = %start.status, "Flow start is no longer pending, skipping");
            return Ok(BatchingOutcome::NotPending(start.status));
        }

        let (contact_ids, created) = match self.resolve_audience(assets, start).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_query_error() => {
                warn!(error = %e, "Flow start query is invalid, failing start");
                StartEvent::Fail(e.user_message()).apply(start.status)?;
                self.starts.mark_failed(start.id).await?;
                log_start_operation(
                    "create_batches",
                    start.id,
                    start.org_id,
                    &StartStatus::Failed.to_string(),
                    None,
                    Some(&e.user_message()),
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let contact_count = contact_ids.len();

        StartEvent::Begin { contact_count }.apply(start.status)?;
        if !self
            .starts
            .mark_starting(start.id, contact_count, &created)
            .await?
        {
            warn!("Flow start was started concurrently, skipping");
            return Ok(BatchingOutcome::NotPending(StartStatus::Starting));
        }
        log_start_operation(
            "create_batches",
            start.id,
            start.org_id,
            &StartStatus::Starting.to_string(),
            Some(contact_count),
            None,
        );

        if contact_ids.is_empty() {
            self.starts.mark_complete(start.id).await?;
            log_start_operation(
                "create_batches",
                start.id,
                start.org_id,
                &StartStatus::Complete.to_string(),
                Some(0),
                Some("no contacts resolved"),
            );
            return Ok(BatchingOutcome::Empty);
        }

        let route = self.route_for(start.flow_type, contact_count);
        let batch_size = self.config.batch_size.max(1);
        let batch_count = contact_count.div_ceil(batch_size);

        let mut failed_batches = 0;
        let mut dropped_contacts = 0;

        for (index, chunk) in contact_ids.chunks(batch_size).enumerate() {
            let batch = FlowStartBatch {
                start_id: start.id,
                batch_index: index as i32,
                org_id: start.org_id,
                flow_id: start.flow_id,
                flow_type: start.flow_type,
                start_type: start.start_type,
                contact_ids: chunk.to_vec(),
                restart_participants: start.restart_participants,
                include_active: start.include_active,
                extra: start.extra.clone(),
                created_by: start.created_by,
                total_contacts: contact_count,
                is_last: index + 1 == batch_count,
            };

            if let Err(e) = self.enqueue_batch(&route, &batch).await {
                error!(
                    batch_index = index,
                    contacts = chunk.len(),
                    queue = %route.queue,
                    error = %e,
                    "Failed to enqueue flow start batch"
                );
                failed_batches += 1;
                dropped_contacts += chunk.len();
            }
        }

        let mut status = StartStatus::Starting;
        if dropped_contacts > 0 {
            let nothing_queued = failed_batches == batch_count;
            status = self
                .starts
                .record_dropped(start.id, dropped_contacts, nothing_queued)
                .await?;
        }

        info!(
            contact_count = contact_count,
            batch_count = batch_count,
            failed_batches = failed_batches,
            queue = %route.queue,
            task_type = route.task_type,
            "Queued flow start batches"
        );
        log_start_operation(
            "create_batches",
            start.id,
            start.org_id,
            &status.to_string(),
            Some(contact_count),
            (dropped_contacts > 0)
                .then(|| format!("{dropped_contacts} contacts dropped"))
                .as_deref(),
        );

        Ok(BatchingOutcome::Queued {
            contact_count,
            batch_count,
            failed_batches,
            dropped_contacts,
            route,
            status,
        })
    }

    /// The start's contacts, each once, and the ones created on the way
    async fn resolve_audience(
        &self,
        assets: &OrgAssets,
        start: &FlowStart,
    ) -> Result<(Vec<ContactId>, Vec<ContactId>)> {
        let flow = assets.flow_by_id(start.flow_id);
        if flow.is_none() {
            warn!(flow_id = %start.flow_id, "Flow not in org assets, previous participants can't be excluded");
        }

        let resolved = self
            .recipients
            .resolve_recipients(assets, flow, &start.recipients())
            .await?;

        let mut contact_ids: ContactIdSet = resolved.contact_ids.into_iter().collect();
        let mut created = resolved.created_ids;

        if start.create_contact {
            let contact_id = self
                .contacts
                .create_contact(start.org_id)
                .await
                .map_err(|e| MailroomError::during(ResolutionStep::ContactLookup, e))?;
            contact_ids.insert(contact_id);
            created.push(contact_id);
        }

        Ok((contact_ids.into_vec(), created))
    }

    async fn enqueue_batch(&self, route: &BatchRoute, batch: &FlowStartBatch) -> Result<()> {
        let task = QueuedTask::new(route.task_type, batch.org_id, batch)?
            .with_priority(route.priority);
        self.queue.push(&route.queue, &task).await?;
        Ok(())
    }
}
