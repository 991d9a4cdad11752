//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::{ContactStore, FlowStartStore, GroupLock, GroupStore, SessionStore};
use crate::error::{MailroomError, Result};
use crate::models::{
    BatchCompletion, Contact, ContactId, FlowSession, FlowStart, Group, GroupId, NewFlowStart,
    NewSession, OrgId, StartId, Urn, UrnResolution,
};
use crate::state_machine::{GroupStatus, StartStatus};

/// Advisory lock namespace for smart group evaluation
const GROUP_LOCK_NAMESPACE: i32 = 0x6d67;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn count_to_i32(count: usize) -> Result<i32> {
    i32::try_from(count).map_err(|_| {
        MailroomError::Database(sqlx::Error::Encode(
            format!("contact count {count} out of range").into(),
        ))
    })
}

#[async_trait]
impl ContactStore for PgStore {
    async fn existing_ids(&self, org_id: OrgId, ids: &[ContactId]) -> Result<Vec<ContactId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(Contact::existing_ids(&self.pool, org_id, ids).await?)
    }

    async fn load_contacts(&self, org_id: OrgId, ids: &[ContactId]) -> Result<Vec<Contact>> {
        Ok(Contact::load_by_ids(&self.pool, org_id, ids).await?)
    }

    async fn get_or_create_by_urns(&self, org_id: OrgId, urns: &[Urn]) -> Result<UrnResolution> {
        if urns.is_empty() {
            return Ok(UrnResolution::default());
        }
        Ok(Contact::get_or_create_by_urns(&self.pool, org_id, urns).await?)
    }

    async fn create_contact(&self, org_id: OrgId) -> Result<ContactId> {
        Ok(Contact::create(&self.pool, org_id).await?)
    }

    async fn last_modified_on(&self, org_id: OrgId) -> Result<Option<DateTime<Utc>>> {
        Ok(Contact::last_modified_on(&self.pool, org_id).await?)
    }
}

/// Transaction-scoped advisory lock. Membership writes share the
/// transaction, so they commit with the release or roll back with a drop.
struct PgGroupLock {
    group_id: GroupId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl GroupLock for PgGroupLock {
    async fn apply_membership(
        &mut self,
        removed: &[ContactId],
        added: &[ContactId],
    ) -> Result<()> {
        let removed_rows = Group::remove_contacts(&mut self.tx, self.group_id, removed).await?;
        let added_rows = Group::add_contacts(&mut self.tx, self.group_id, added).await?;

        let changed: Vec<ContactId> = removed.iter().chain(added).copied().collect();
        Contact::touch_modified_on(&mut self.tx, &changed).await?;

        debug!(
            group_id = %self.group_id,
            removed = removed_rows,
            added = added_rows,
            "Staged group membership changes"
        );
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        debug!(group_id = %self.group_id, "Released group evaluation lock");
        Ok(())
    }
}

#[async_trait]
impl GroupStore for PgStore {
    async fn lock_group(&self, group_id: GroupId) -> Result<Box<dyn GroupLock>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(GROUP_LOCK_NAMESPACE)
            .bind(group_id.0)
            .execute(&mut *tx)
            .await?;
        debug!(group_id = %group_id, "Acquired group evaluation lock");
        Ok(Box::new(PgGroupLock { group_id, tx }))
    }

    async fn update_status(&self, group_id: GroupId, status: GroupStatus) -> Result<()> {
        Ok(Group::update_status(&self.pool, group_id, status).await?)
    }

    async fn member_ids(&self, group_id: GroupId) -> Result<Vec<ContactId>> {
        Ok(Group::member_ids(&self.pool, group_id).await?)
    }

    async fn members_of_groups(&self, group_ids: &[GroupId]) -> Result<Vec<ContactId>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(Contact::member_ids_for_groups(&self.pool, group_ids).await?)
    }
}

#[async_trait]
impl FlowStartStore for PgStore {
    async fn create_start(&self, new_start: NewFlowStart) -> Result<FlowStart> {
        Ok(FlowStart::create(&self.pool, new_start).await?)
    }

    async fn find_start(&self, id: StartId) -> Result<Option<FlowStart>> {
        Ok(FlowStart::find_by_id(&self.pool, id).await?)
    }

    async fn mark_starting(
        &self,
        id: StartId,
        contact_count: usize,
        created_contacts: &[ContactId],
    ) -> Result<bool> {
        let count = count_to_i32(contact_count)?;
        Ok(FlowStart::mark_starting(&self.pool, id, count, created_contacts).await?)
    }

    async fn mark_complete(&self, id: StartId) -> Result<()> {
        Ok(FlowStart::mark_complete(&self.pool, id).await?)
    }

    async fn mark_failed(&self, id: StartId) -> Result<()> {
        Ok(FlowStart::mark_failed(&self.pool, id).await?)
    }

    async fn record_dropped(
        &self,
        id: StartId,
        dropped: usize,
        nothing_queued: bool,
    ) -> Result<StartStatus> {
        let dropped = count_to_i32(dropped)?;
        Ok(FlowStart::record_dropped(&self.pool, id, dropped, nothing_queued).await?)
    }

    async fn is_batch_recorded(&self, id: StartId, batch_index: i32) -> Result<bool> {
        Ok(FlowStart::is_batch_recorded(&self.pool, id, batch_index).await?)
    }

    async fn record_batch_complete(
        &self,
        id: StartId,
        batch_index: i32,
        contact_count: usize,
    ) -> Result<BatchCompletion> {
        let count = count_to_i32(contact_count)?;
        Ok(FlowStart::record_batch_complete(&self.pool, id, batch_index, count).await?)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn persist_session(&self, session: &NewSession) -> Result<i64> {
        Ok(FlowSession::persist(&self.pool, session).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_conversion() {
        assert_eq!(count_to_i32(100).unwrap(), 100);
        assert!(count_to_i32(usize::MAX).is_err());
    }
}
