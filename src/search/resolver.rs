//! # Search Resolver
//!
//! Resolves contact queries to contact ids through a [`SearchIndex`].
//!
//! Small result sets come back from a single paged search. Unbounded or
//! large resolutions open a point in time and walk it with `search_after`,
//! so pages stay consistent with each other while the index keeps changing
//! underneath. Every search is sorted with an `id` tie-break: repeated calls
//! against an unchanged index return ids in the same order.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::index::SearchIndex;
use super::translate::{contacts_query, sort_clauses};
use super::SearchError;
use crate::assets::OrgAssets;
use crate::constants::system;
use crate::models::{ContactId, ContactIdSet};
use crate::query_builder::{parse_query, ContactQuery};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    /// Largest `from + size` the index serves without scrolling
    pub max_result_window: usize,
    pub point_in_time_keep_alive: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_result_window: system::MAX_RESULT_WINDOW,
            point_in_time_keep_alive: system::POINT_IN_TIME_KEEP_ALIVE.to_string(),
        }
    }
}

/// One page of resolved ids
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPage {
    /// The query as parsed against the org's assets
    pub query: ContactQuery,
    pub ids: Vec<ContactId>,
    pub total: u64,
}

#[derive(Clone)]
pub struct SearchResolver {
    index: Arc<dyn SearchIndex>,
    settings: SearchSettings,
}

impl std::fmt::Debug for SearchResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchResolver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl SearchResolver {
    pub fn new(index: Arc<dyn SearchIndex>, settings: SearchSettings) -> Self {
        Self { index, settings }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Resolves one page of a query, with the total number of matches.
    /// The page must end within the result window.
    #[instrument(skip(self, assets, exclude_ids), fields(org_id = %assets.org_id()))]
    pub async fn resolve_ids(
        &self,
        assets: &OrgAssets,
        query: &str,
        sort: Option<&str>,
        exclude_ids: &[ContactId],
        offset: usize,
        page_size: usize,
    ) -> Result<ResolvedPage, SearchError> {
        let parsed = parse_query(query, assets)?;

        let max_result_window = self.settings.max_result_window;
        if offset.saturating_add(page_size) > max_result_window {
            return Err(SearchError::PageOutOfRange {
                offset,
                size: page_size,
                max_result_window,
            });
        }

        let body = json!({
            "_source": false,
            "query": contacts_query(assets, parsed.root(), exclude_ids)?,
            "sort": sort_clauses(sort, assets)?,
            "from": offset,
            "size": page_size,
            "track_total_hits": true,
        });

        let hits = self.index.search(assets.org_id(), body).await?;
        let ids: ContactIdSet = hits.hits.iter().map(|h| h.id).collect();
        let total = hits.total.unwrap_or(ids.len() as u64);

        debug!(
            query = %parsed,
            offset = offset,
            count = ids.len(),
            total = total,
            "Resolved page of contact ids"
        );

        Ok(ResolvedPage {
            query: parsed,
            ids: ids.into_vec(),
            total,
        })
    }

    /// Resolves every id matching a query, or the first `limit` of them
    #[instrument(skip(self, assets), fields(org_id = %assets.org_id()))]
    pub async fn resolve_all_ids(
        &self,
        assets: &OrgAssets,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ContactId>, SearchError> {
        let parsed = parse_query(query, assets)?;
        let index_query = contacts_query(assets, parsed.root(), &[])?;
        let sort = sort_clauses(None, assets)?;

        let ids = match limit {
            Some(0) => ContactIdSet::new(),
            Some(limit) if limit <= self.settings.max_result_window => {
                let body = json!({
                    "_source": false,
                    "query": index_query,
                    "sort": sort,
                    "size": limit,
                    "track_total_hits": false,
                });
                let hits = self.index.search(assets.org_id(), body).await?;
                hits.hits.iter().map(|h| h.id).collect()
            }
            _ => self.scroll(assets, index_query, sort, limit).await?,
        };

        debug!(query = %parsed, count = ids.len(), "Resolved all contact ids");
        Ok(ids.into_vec())
    }

    async fn scroll(
        &self,
        assets: &OrgAssets,
        index_query: Value,
        sort: Vec<Value>,
        limit: Option<usize>,
    ) -> Result<ContactIdSet, SearchError> {
        let pit_id = self.index.open_point_in_time(assets.org_id()).await?;
        let (result, last_pit) = self
            .scroll_pages(assets, index_query, sort, limit, pit_id)
            .await;

        if let Err(e) = self.index.close_point_in_time(&last_pit).await {
            warn!(org_id = %assets.org_id(), error = %e, "Failed to close point in time");
        }
        result
    }

    /// Walks a point in time page by page. Returns the most recent point in
    /// time id alongside the result so it can be closed either way.
    async fn scroll_pages(
        &self,
        assets: &OrgAssets,
        index_query: Value,
        sort: Vec<Value>,
        limit: Option<usize>,
        mut pit_id: String,
    ) -> (Result<ContactIdSet, SearchError>, String) {
        let mut ids = ContactIdSet::new();
        let mut search_after: Option<Vec<Value>> = None;
        let page_size = self.settings.max_result_window.max(1);

        loop {
            let size = match limit {
                Some(limit) => page_size.min(limit - ids.len()),
                None => page_size,
            };
            let mut body = json!({
                "_source": false,
                "query": index_query,
                "sort": sort,
                "size": size,
                "track_total_hits": false,
                "pit": { "id": pit_id, "keep_alive": self.settings.point_in_time_keep_alive },
            });
            if let Some(after) = &search_after {
                body["search_after"] = Value::Array(after.clone());
            }

            let hits = match self.index.search(assets.org_id(), body).await {
                Ok(hits) => hits,
                Err(e) => return (Err(e), pit_id),
            };
            if let Some(next_pit) = hits.pit_id {
                pit_id = next_pit;
            }

            let page_len = hits.hits.len();
            search_after = hits.hits.last().map(|h| h.sort.clone());
            ids.extend(hits.hits.into_iter().map(|h| h.id));

            let reached_limit = limit.is_some_and(|l| ids.len() >= l);
            if page_len < size || reached_limit || search_after.is_none() {
                break;
            }
        }

        if let Some(limit) = limit {
            ids.truncate(limit);
        }
        (Ok(ids), pit_id)
    }
}
