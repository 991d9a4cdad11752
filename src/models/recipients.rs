//! # Recipients
//!
//! The audience descriptor handed to the recipient resolver: who to include,
//! and which contacts to exclude again.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

use super::ids::{ContactId, GroupId};
use super::urn::Urn;

/// Toggles that narrow an audience
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusions {
    /// Exclude contacts that are blocked, stopped or archived
    #[serde(default)]
    pub non_active: bool,
    /// Exclude contacts currently in a flow
    #[serde(default)]
    pub in_a_flow: bool,
    /// Exclude contacts who have ever started the target flow
    #[serde(default)]
    pub started_previously: bool,
    /// Exclude contacts not seen in this many days (0 disables)
    #[serde(default)]
    pub not_seen_since_days: u32,
}

impl Exclusions {
    pub const NONE: Exclusions = Exclusions {
        non_active: false,
        in_a_flow: false,
        started_previously: false,
        not_seen_since_days: 0,
    };

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// Immutable description of an audience. Id and URN lists are deduplicated
/// on construction, keeping first occurrences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientSpec {
    contact_ids: Vec<ContactId>,
    group_ids: Vec<GroupId>,
    urns: Vec<Urn>,
    query: String,
    limit: Option<usize>,
    exclusions: Exclusions,
    exclude_group_ids: Vec<GroupId>,
}

impl RecipientSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contacts(mut self, ids: impl IntoIterator<Item = ContactId>) -> Self {
        self.contact_ids = unique(ids);
        self
    }

    pub fn with_groups(mut self, ids: impl IntoIterator<Item = GroupId>) -> Self {
        self.group_ids = unique(ids);
        self
    }

    pub fn with_urns(mut self, urns: impl IntoIterator<Item = Urn>) -> Self {
        self.urns = unique(urns);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into().trim().to_string();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_exclusions(mut self, exclusions: Exclusions) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn excluding_groups(mut self, ids: impl IntoIterator<Item = GroupId>) -> Self {
        self.exclude_group_ids = unique(ids);
        self
    }

    pub fn contact_ids(&self) -> &[ContactId] {
        &self.contact_ids
    }

    pub fn group_ids(&self) -> &[GroupId] {
        &self.group_ids
    }

    pub fn urns(&self) -> &[Urn] {
        &self.urns
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn exclusions(&self) -> Exclusions {
        self.exclusions
    }

    pub fn exclude_group_ids(&self) -> &[GroupId] {
        &self.exclude_group_ids
    }
}

fn unique<T: Clone + Eq + Hash>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_dedups_inputs() {
        let spec = RecipientSpec::new()
            .with_contacts([ContactId(5), ContactId(2), ContactId(5)])
            .with_groups([GroupId(1), GroupId(1)])
            .with_urns(["tel:+1555".parse().unwrap(), "tel:+1 555".parse().unwrap()])
            .with_query("  age > 18 ");

        assert_eq!(spec.contact_ids(), &[ContactId(5), ContactId(2)]);
        assert_eq!(spec.group_ids(), &[GroupId(1)]);
        assert_eq!(spec.urns().len(), 1);
        assert_eq!(spec.query(), "age > 18");
        assert!(spec.exclusions().is_none());
    }

    #[test]
    fn test_exclusions_default_is_none() {
        assert!(Exclusions::default().is_none());
        let excs = Exclusions {
            not_seen_since_days: 30,
            ..Default::default()
        };
        assert!(!excs.is_none());
    }
}
