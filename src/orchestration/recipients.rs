//! # Recipient Resolver
//!
//! Turns a [`RecipientSpec`] into the deduplicated list of contact ids it
//! targets.
//!
//! Resolution order:
//!
//! 1. explicit contact ids are checked against the store
//! 2. URNs are resolved to their owners, creating contacts for unowned URNs
//! 3. group ids are resolved against the org's assets, unknown ids dropped
//! 4. with no groups, query, excluded groups or exclusions the result is the
//!    union of steps 1 and 2 and the search index is never consulted
//! 5. otherwise one query is built for the whole audience and resolved
//!    through the search index
//! 6. contacts created in step 2 are appended unless a last-seen exclusion
//!    applies, since the index can't know about them yet
//!
//! When nothing narrows the audience, explicit contacts and the stored
//! members of included groups are merged in alongside the index results:
//! the store is authoritative and may be ahead of the index.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::assets::OrgAssets;
use crate::error::{MailroomError, ResolutionStep, Result};
use crate::models::{ContactId, ContactIdSet, FlowRef, Group, GroupId, RecipientSpec};
use crate::query_builder::{build_recipients_query, parse_query, RecipientsQuery};
use crate::search::SearchResolver;
use crate::store::{ContactStore, GroupStore};

/// Resolved audience
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRecipients {
    /// Every targeted contact, each once, newly created contacts included
    pub contact_ids: Vec<ContactId>,
    /// Contacts created while resolving URNs
    pub created_ids: Vec<ContactId>,
}

#[derive(Clone)]
pub struct RecipientResolver {
    contacts: Arc<dyn ContactStore>,
    groups: Arc<dyn GroupStore>,
    search: SearchResolver,
}

impl std::fmt::Debug for RecipientResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipientResolver")
            .field("search", &self.search)
            .finish()
    }
}

impl RecipientResolver {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        groups: Arc<dyn GroupStore>,
        search: SearchResolver,
    ) -> Self {
        Self {
            contacts,
            groups,
            search,
        }
    }

    /// `flow` is the flow being started, if any. Without it the
    /// started-previously exclusion has nothing to key on and is skipped.
    #[instrument(skip_all, fields(org_id = %assets.org_id()))]
    pub async fn resolve_recipients(
        &self,
        assets: &OrgAssets,
        flow: Option<&FlowRef>,
        spec: &RecipientSpec,
    ) -> Result<ResolvedRecipients> {
        let org_id = assets.org_id();

        let explicit = self
            .contacts
            .existing_ids(org_id, spec.contact_ids())
            .await
            .map_err(|e| MailroomError::during(ResolutionStep::ContactLookup, e))?;

        let by_urn = self
            .contacts
            .get_or_create_by_urns(org_id, spec.urns())
            .await
            .map_err(|e| MailroomError::during(ResolutionStep::ContactLookup, e))?;

        let mut known = ContactIdSet::with_capacity(explicit.len() + by_urn.fetched.len());
        known.extend(explicit);
        known.extend(by_urn.fetched);

        let include_groups = assets.groups_by_ids(spec.group_ids());
        let exclude_groups = assets.groups_by_ids(spec.exclude_group_ids());
        let exclusions = spec.exclusions();

        let fast_path = include_groups.is_empty()
            && spec.query().is_empty()
            && exclude_groups.is_empty()
            && exclusions.is_none();

        let mut resolved = if fast_path {
            debug!(contacts = known.len(), "Resolved recipients without search");
            known
        } else {
            self.resolve_with_search(assets, flow, spec, known, &include_groups, &exclude_groups)
                .await?
        };

        if exclusions.not_seen_since_days == 0 {
            resolved.extend(by_urn.created.iter().copied());
        }

        debug!(
            resolved = resolved.len(),
            created = by_urn.created.len(),
            "Resolved recipients"
        );

        Ok(ResolvedRecipients {
            contact_ids: resolved.into_vec(),
            created_ids: by_urn.created,
        })
    }

    async fn resolve_with_search(
        &self,
        assets: &OrgAssets,
        flow: Option<&FlowRef>,
        spec: &RecipientSpec,
        known: ContactIdSet,
        include_groups: &[&Group],
        exclude_groups: &[&Group],
    ) -> Result<ContactIdSet> {
        let user_query = if spec.query().is_empty() {
            None
        } else {
            let parsed = parse_query(spec.query(), assets)
                .map_err(|e| MailroomError::during(ResolutionStep::Search, e))?;
            parsed.into_root()
        };

        // a query of exclusions alone would match the whole org
        if include_groups.is_empty() && known.is_empty() && user_query.is_none() {
            debug!("Nothing left to include, skipping search");
            return Ok(ContactIdSet::new());
        }

        let input = RecipientsQuery {
            flow,
            groups: include_groups,
            contact_ids: known.as_slice(),
            user_query: user_query.as_ref(),
            exclusions: spec.exclusions(),
            exclude_groups,
            ..RecipientsQuery::new(assets.env())
        };
        let query = build_recipients_query(&input, Utc::now()).to_string();

        let matched = self
            .search
            .resolve_all_ids(assets, &query, spec.limit())
            .await
            .map_err(|e| MailroomError::during(ResolutionStep::Search, e))?;

        debug!(query = %query, matched = matched.len(), "Resolved recipients query");

        let unfiltered = spec.exclusions().is_none() && exclude_groups.is_empty();
        if !unfiltered {
            return Ok(matched.into_iter().collect());
        }

        let group_ids: Vec<GroupId> = include_groups.iter().map(|g| g.id).collect();
        let members = self
            .groups
            .members_of_groups(&group_ids)
            .await
            .map_err(|e| MailroomError::during(ResolutionStep::GroupQuery, e))?;

        let mut resolved = known;
        resolved.extend(members);
        resolved.extend(matched);
        if let Some(limit) = spec.limit() {
            resolved.truncate(limit);
        }
        Ok(resolved)
    }
}
