//! # Persistence Contract
//!
//! Traits over the authoritative relational store, split by the part of the
//! pipeline that consumes them. [`PgStore`] implements all of them on top of
//! the sqlx queries in [`crate::models`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    BatchCompletion, Contact, ContactId, FlowStart, GroupId, NewFlowStart, NewSession, OrgId,
    StartId, Urn, UrnResolution,
};
use crate::state_machine::{GroupStatus, StartStatus};

pub mod postgres;

pub use postgres::PgStore;

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Filters `ids` down to active contacts of the org, keeping their order
    async fn existing_ids(&self, org_id: OrgId, ids: &[ContactId]) -> Result<Vec<ContactId>>;

    /// Loads active contacts with their URNs
    async fn load_contacts(&self, org_id: OrgId, ids: &[ContactId]) -> Result<Vec<Contact>>;

    async fn get_or_create_by_urns(&self, org_id: OrgId, urns: &[Urn]) -> Result<UrnResolution>;

    /// Creates a contact with no URNs
    async fn create_contact(&self, org_id: OrgId) -> Result<ContactId>;

    /// Most recent modification time of any contact in the org
    async fn last_modified_on(&self, org_id: OrgId) -> Result<Option<DateTime<Utc>>>;
}

/// Held while a smart group is being evaluated. Membership written through
/// the lock becomes visible on `release`. Dropping the lock without
/// releasing it discards those writes and still releases the lock.
#[async_trait]
pub trait GroupLock: Send {
    /// Removes then adds members of the locked group and stamps every
    /// changed contact as modified
    async fn apply_membership(&mut self, removed: &[ContactId], added: &[ContactId])
        -> Result<()>;

    async fn release(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Waits for the exclusive evaluation lock of a group
    async fn lock_group(&self, group_id: GroupId) -> Result<Box<dyn GroupLock>>;

    async fn update_status(&self, group_id: GroupId, status: GroupStatus) -> Result<()>;

    /// Materialized membership of one group
    async fn member_ids(&self, group_id: GroupId) -> Result<Vec<ContactId>>;

    /// Active members of any of the groups, each once
    async fn members_of_groups(&self, group_ids: &[GroupId]) -> Result<Vec<ContactId>>;
}

#[async_trait]
pub trait FlowStartStore: Send + Sync {
    async fn create_start(&self, new_start: NewFlowStart) -> Result<FlowStart>;

    async fn find_start(&self, id: StartId) -> Result<Option<FlowStart>>;

    /// Pending to starting. False when the start was no longer pending.
    async fn mark_starting(
        &self,
        id: StartId,
        contact_count: usize,
        created_contacts: &[ContactId],
    ) -> Result<bool>;

    async fn mark_complete(&self, id: StartId) -> Result<()>;

    async fn mark_failed(&self, id: StartId) -> Result<()>;

    /// Counts contacts that could not be enqueued as settled. A start with
    /// `nothing_queued` is failed in the same write.
    async fn record_dropped(
        &self,
        id: StartId,
        dropped: usize,
        nothing_queued: bool,
    ) -> Result<StartStatus>;

    /// Whether the batch has already been recorded as processed
    async fn is_batch_recorded(&self, id: StartId, batch_index: i32) -> Result<bool>;

    /// Records a processed batch, once per `(id, batch_index)`
    async fn record_batch_complete(
        &self,
        id: StartId,
        batch_index: i32,
        contact_count: usize,
    ) -> Result<BatchCompletion>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn persist_session(&self, session: &NewSession) -> Result<i64>;
}
