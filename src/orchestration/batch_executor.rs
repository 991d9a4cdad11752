//! # Batch Executor
//!
//! Runs one queued [`FlowStartBatch`]: each contact is driven through the
//! external flow engine in turn and the resulting session is persisted in
//! its own transaction. The batch is then recorded against its start, which
//! completes once every resolved contact has been processed or dropped.
//!
//! Batches may be redelivered. Completion is recorded per batch index, so a
//! redelivered batch never counts twice.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::logging::log_start_operation;
use crate::models::{
    BatchCompletion, Contact, ContactId, FlowId, FlowStartBatch, FlowType, NewSession, OrgId,
    SessionStatus, StartId, StartType, UserId,
};
use crate::state_machine::StartStatus;
use crate::store::{ContactStore, FlowStartStore, SessionStore};

/// What caused a flow to be started for a contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowTrigger {
    Manual {
        user: Option<UserId>,
        params: Option<serde_json::Value>,
    },
    Api {
        params: Option<serde_json::Value>,
    },
    /// Started by another flow's start-session action
    FlowAction {
        params: Option<serde_json::Value>,
    },
    Trigger {
        params: Option<serde_json::Value>,
    },
}

impl FlowTrigger {
    pub fn for_batch(batch: &FlowStartBatch) -> Self {
        let params = batch.extra.clone();
        match batch.start_type {
            StartType::Manual => Self::Manual {
                user: batch.created_by,
                params,
            },
            StartType::Api => Self::Api { params },
            StartType::FlowAction => Self::FlowAction { params },
            StartType::Trigger => Self::Trigger { params },
        }
    }

    pub fn params(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Manual { params, .. }
            | Self::Api { params }
            | Self::FlowAction { params }
            | Self::Trigger { params } => params.as_ref(),
        }
    }
}

/// Flow and start a contact is being run through
#[derive(Debug, Clone, PartialEq)]
pub struct FlowStartContext {
    pub org_id: OrgId,
    pub flow_id: FlowId,
    pub flow_type: FlowType,
    pub start_id: StartId,
    /// When false, a contact already in a flow is left where it is
    pub include_active: bool,
}

/// What the flow engine did with one contact
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRun {
    pub status: SessionStatus,
    pub events: Vec<serde_json::Value>,
}

#[async_trait]
pub trait FlowEngine: Send + Sync {
    async fn start_flow(
        &self,
        context: &FlowStartContext,
        contact: &Contact,
        trigger: &FlowTrigger,
    ) -> Result<FlowRun>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContactOutcome {
    Started {
        session_id: i64,
        status: SessionStatus,
    },
    /// The contact was deleted after the batch was created
    Missing,
    /// The flow engine rejected the contact
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactResult {
    pub contact_id: ContactId,
    pub outcome: ContactOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub start_id: StartId,
    pub batch_index: i32,
    pub results: Vec<ContactResult>,
    pub completion: BatchCompletion,
}

impl BatchResult {
    pub fn started_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ContactOutcome::Started { .. }))
            .count()
    }
}

pub struct BatchExecutor {
    contacts: Arc<dyn ContactStore>,
    sessions: Arc<dyn SessionStore>,
    starts: Arc<dyn FlowStartStore>,
    engine: Arc<dyn FlowEngine>,
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor").finish_non_exhaustive()
    }
}

impl BatchExecutor {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        sessions: Arc<dyn SessionStore>,
        starts: Arc<dyn FlowStartStore>,
        engine: Arc<dyn FlowEngine>,
    ) -> Self {
        Self {
            contacts,
            sessions,
            starts,
            engine,
        }
    }

    #[instrument(skip(self, batch), fields(start_id = %batch.start_id, batch_index = batch.batch_index))]
    pub async fn start_flow_batch(&self, batch: &FlowStartBatch) -> Result<BatchResult> {
        if self
            .starts
            .is_batch_recorded(batch.start_id, batch.batch_index)
            .await?
        {
            warn!("Batch already processed, skipping redelivery");
            return Ok(BatchResult {
                start_id: batch.start_id,
                batch_index: batch.batch_index,
                results: Vec::new(),
                completion: BatchCompletion::Duplicate,
            });
        }

        let loaded = self
            .contacts
            .load_contacts(batch.org_id, &batch.contact_ids)
            .await?;
        let mut by_id: HashMap<ContactId, Contact> =
            loaded.into_iter().map(|c| (c.id, c)).collect();

        let context = FlowStartContext {
            org_id: batch.org_id,
            flow_id: batch.flow_id,
            flow_type: batch.flow_type,
            start_id: batch.start_id,
            include_active: batch.include_active,
        };
        let trigger = FlowTrigger::for_batch(batch);

        let mut results = Vec::with_capacity(batch.contact_ids.len());
        for contact_id in &batch.contact_ids {
            let outcome = match by_id.remove(contact_id) {
                Some(contact) => self.run_contact(&context, &contact, &trigger).await?,
                None => ContactOutcome::Missing,
            };
            results.push(ContactResult {
                contact_id: *contact_id,
                outcome,
            });
        }

        let completion = self
            .starts
            .record_batch_complete(batch.start_id, batch.batch_index, batch.contact_ids.len())
            .await?;

        match completion {
            BatchCompletion::Recorded {
                status: StartStatus::Complete,
                processed_count,
            } => {
                log_start_operation(
                    "complete",
                    batch.start_id,
                    batch.org_id,
                    &StartStatus::Complete.to_string(),
                    Some(batch.total_contacts),
                    Some(&format!("{processed_count} contacts processed")),
                );
            }
            BatchCompletion::Recorded { .. } => {
                if batch.is_last {
                    debug!("Last batch processed ahead of earlier batches");
                }
            }
            BatchCompletion::Duplicate => {
                warn!("Batch recorded by a concurrent delivery");
            }
        }

        let result = BatchResult {
            start_id: batch.start_id,
            batch_index: batch.batch_index,
            results,
            completion,
        };
        info!(
            contacts = batch.contact_ids.len(),
            started = result.started_count(),
            is_last = batch.is_last,
            "Processed flow start batch"
        );
        Ok(result)
    }

    /// Runs one contact. Flow engine errors are per contact; storage errors
    /// abort the batch.
    async fn run_contact(
        &self,
        context: &FlowStartContext,
        contact: &Contact,
        trigger: &FlowTrigger,
    ) -> Result<ContactOutcome> {
        let run = match self.engine.start_flow(context, contact, trigger).await {
            Ok(run) => run,
            Err(e) => {
                warn!(contact_id = %contact.id, error = %e, "Flow engine failed to start contact");
                return Ok(ContactOutcome::Failed(e.to_string()));
            }
        };

        let session = NewSession {
            uuid: Uuid::new_v4(),
            org_id: context.org_id,
            contact_id: contact.id,
            flow_id: context.flow_id,
            start_id: Some(context.start_id),
            status: run.status,
            events: run.events,
        };
        let session_id = self.sessions.persist_session(&session).await?;

        Ok(ContactOutcome::Started {
            session_id,
            status: session.status,
        })
    }
}
