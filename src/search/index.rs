use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::SearchError;
use crate::models::{ContactId, OrgId};

/// One page of search hits
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    /// Total matches, when the request asked for it to be tracked
    pub total: Option<u64>,
    pub hits: Vec<SearchHit>,
    /// Point-in-time id to use for the next page, if the index rotated it
    pub pit_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: ContactId,
    /// Sort values, used as the `search_after` cursor
    pub sort: Vec<Value>,
}

/// Low-level contact index operations
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Runs a search body. Bodies carrying a `pit` clause are run against
    /// that point in time rather than the index.
    async fn search(&self, org_id: OrgId, body: Value) -> Result<SearchHits, SearchError>;

    async fn open_point_in_time(&self, org_id: OrgId) -> Result<String, SearchError>;

    async fn close_point_in_time(&self, pit_id: &str) -> Result<(), SearchError>;
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawResponse {
    pub pit_id: Option<String>,
    pub hits: RawHits,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHits {
    pub total: Option<RawTotal>,
    #[serde(default)]
    pub hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTotal {
    pub value: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub sort: Vec<Value>,
}

impl TryFrom<RawResponse> for SearchHits {
    type Error = SearchError;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        let hits = raw
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                let id = hit
                    .id
                    .parse::<i64>()
                    .map_err(|_| SearchError::Decode(format!("non-numeric document id '{}'", hit.id)))?;
                Ok(SearchHit {
                    id: ContactId(id),
                    sort: hit.sort,
                })
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        Ok(SearchHits {
            total: raw.hits.total.map(|t| t.value),
            hits,
            pit_id: raw.pit_id,
        })
    }
}
