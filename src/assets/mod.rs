//! # Org Assets
//!
//! Read-only snapshots of the org configuration that query parsing and
//! resolution depend on: the org environment, custom fields, groups and
//! flows.
//!
//! Snapshots are obtained from an [`AssetCache`] and passed explicitly into
//! every resolver call. The cache keeps a snapshot per org for a short TTL,
//! rebuilds it on a miss, and exposes [`AssetCache::refresh`] and
//! [`AssetCache::invalidate`] for callers that know the org changed.

pub mod cache;
pub mod loader;

pub use cache::AssetCache;
pub use loader::{AssetLoader, PgAssetLoader};

use crate::models::{
    ContactField, FlowId, FlowRef, Group, GroupId, OrgEnvironment, OrgId,
};

#[derive(Debug, Clone, Default)]
pub struct OrgAssets {
    env: OrgEnvironment,
    fields: Vec<ContactField>,
    groups: Vec<Group>,
    flows: Vec<FlowRef>,
}

impl OrgAssets {
    pub fn new(
        env: OrgEnvironment,
        fields: Vec<ContactField>,
        groups: Vec<Group>,
        flows: Vec<FlowRef>,
    ) -> Self {
        Self {
            env,
            fields,
            groups,
            flows,
        }
    }

    pub fn org_id(&self) -> OrgId {
        self.env.org_id
    }

    pub fn env(&self) -> &OrgEnvironment {
        &self.env
    }

    pub fn fields(&self) -> &[ContactField] {
        &self.fields
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn flows(&self) -> &[FlowRef] {
        &self.flows
    }

    /// Field keys are matched case-insensitively
    pub fn field_by_key(&self, key: &str) -> Option<&ContactField> {
        self.fields.iter().find(|f| f.key.eq_ignore_ascii_case(key))
    }

    pub fn group_by_id(&self, id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Group names are matched case-insensitively
    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|g| g.name.to_lowercase() == name.to_lowercase())
    }

    pub fn flow_by_id(&self, id: FlowId) -> Option<&FlowRef> {
        self.flows.iter().find(|f| f.id == id)
    }

    pub fn flow_by_name(&self, name: &str) -> Option<&FlowRef> {
        self.flows
            .iter()
            .find(|f| f.name.to_lowercase() == name.to_lowercase())
    }

    /// Resolves group ids to live groups, silently dropping ids that don't
    /// resolve and keeping the given order
    pub fn groups_by_ids(&self, ids: &[GroupId]) -> Vec<&Group> {
        ids.iter().filter_map(|id| self.group_by_id(*id)).collect()
    }
}
