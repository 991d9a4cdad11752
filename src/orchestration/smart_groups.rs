//! # Smart Group Reconciler
//!
//! Materializes the membership of a query-defined group. Evaluation moves
//! the group to `Evaluating`, diffs stored membership against the live query
//! result and moves it back to `Ready`. Membership changes commit together
//! with the release of the group lock, so a failed evaluation leaves
//! membership as it was and the group `Evaluating` for the caller to retry.
//!
//! At most one evaluation of a group runs at a time: concurrent calls in
//! this process queue on a per-group gate, and processes serialize on the
//! store's group lock.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::assets::OrgAssets;
use crate::error::{MailroomError, ResolutionStep, Result};
use crate::logging::log_group_operation;
use crate::models::{ContactId, Group, GroupId};
use crate::search::SearchResolver;
use crate::state_machine::{GroupEvent, GroupStatus};
use crate::store::{ContactStore, GroupStore};

/// Membership changes made by one evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<ContactId>,
    pub removed: Vec<ContactId>,
}

impl MembershipDiff {
    /// Splits `current` and `live` membership into additions and removals.
    /// Both come out in the order of their source list.
    pub fn compute(current: &[ContactId], live: &[ContactId]) -> Self {
        let current_set: HashSet<ContactId> = current.iter().copied().collect();
        let live_set: HashSet<ContactId> = live.iter().copied().collect();

        let mut seen = HashSet::with_capacity(live.len());
        let added = live
            .iter()
            .copied()
            .filter(|id| !current_set.contains(id) && seen.insert(*id))
            .collect();
        let removed = current
            .iter()
            .copied()
            .filter(|id| !live_set.contains(id))
            .collect();

        Self { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn changed(&self) -> Vec<ContactId> {
        self.removed.iter().chain(self.added.iter()).copied().collect()
    }
}

pub struct SmartGroupReconciler {
    contacts: Arc<dyn ContactStore>,
    groups: Arc<dyn GroupStore>,
    search: SearchResolver,
    freshness_window: Duration,
    in_flight: DashMap<GroupId, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for SmartGroupReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartGroupReconciler")
            .field("freshness_window", &self.freshness_window)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl SmartGroupReconciler {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        groups: Arc<dyn GroupStore>,
        search: SearchResolver,
        freshness_window: Duration,
    ) -> Self {
        Self {
            contacts,
            groups,
            search,
            freshness_window,
            in_flight: DashMap::new(),
        }
    }

    /// Re-evaluates `query` and makes it the group's membership. Returns the
    /// number of contacts matching the query.
    #[instrument(skip(self, assets, group, query), fields(org_id = %assets.org_id(), group_id = %group.id))]
    pub async fn populate_smart_group(
        &self,
        assets: &OrgAssets,
        group: &Group,
        query: &str,
    ) -> Result<usize> {
        let gate = self
            .in_flight
            .entry(group.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = gate.lock().await;
            self.evaluate_locked(assets, group, query).await
        };

        drop(gate);
        self.in_flight
            .remove_if(&group.id, |_, gate| Arc::strong_count(gate) == 1);

        result
    }

    async fn evaluate_locked(&self, assets: &OrgAssets, group: &Group, query: &str) -> Result<usize> {
        let mut lock = self.groups.lock_group(group.id).await?;

        let evaluating = GroupEvent::BeginEvaluation.apply(group.status)?;
        self.groups.update_status(group.id, evaluating).await?;

        self.wait_for_index(assets).await?;

        let current = self
            .groups
            .member_ids(group.id)
            .await
            .map_err(|e| MailroomError::during(ResolutionStep::GroupQuery, e))?;
        let live = self
            .search
            .resolve_all_ids(assets, query, None)
            .await
            .map_err(|e| MailroomError::during(ResolutionStep::Search, e))?;

        let diff = MembershipDiff::compute(&current, &live);

        // uncommitted until the lock is released
        if !diff.is_empty() {
            lock.apply_membership(&diff.removed, &diff.added).await?;
        }
        lock.release().await?;

        let ready = GroupEvent::FinishEvaluation.apply(evaluating)?;
        self.groups.update_status(group.id, ready).await?;

        let matched = live.len();
        info!(
            group_id = %group.id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            matched = matched,
            "Populated smart group"
        );
        log_group_operation(
            "populate",
            group.id,
            assets.org_id(),
            &GroupStatus::Ready.to_string(),
            Some(&format!("{matched} contacts")),
        );

        Ok(matched)
    }

    /// Sleeps until the freshness window after the org's most recent contact
    /// modification has passed, so the index reflects it.
    async fn wait_for_index(&self, assets: &OrgAssets) -> Result<()> {
        let Some(last_modified) = self.contacts.last_modified_on(assets.org_id()).await? else {
            return Ok(());
        };

        let since = (Utc::now() - last_modified).to_std().unwrap_or(Duration::ZERO);
        if since < self.freshness_window {
            let wait = self.freshness_window - since;
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for search index to catch up");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}
