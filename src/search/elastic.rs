//! # Elasticsearch Index
//!
//! [`SearchIndex`] over the Elasticsearch REST API. Searches are routed by
//! org id, matching how contact documents are indexed, and every request is
//! bounded by the configured timeout.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::index::{RawResponse, SearchHits, SearchIndex};
use super::SearchError;
use crate::config::ElasticConfig;
use crate::models::OrgId;

#[derive(Debug, Clone)]
pub struct ElasticSearchIndex {
    client: Client,
    base_url: Url,
    index: String,
    keep_alive: String,
    credentials: Option<(String, Option<String>)>,
}

#[derive(Debug, Deserialize)]
struct OpenPitResponse {
    id: String,
}

impl ElasticSearchIndex {
    pub fn new(config: &ElasticConfig) -> Result<Self, SearchError> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| SearchError::NotConfigured(format!("invalid url '{}': {e}", config.url)))?;
        if config.contacts_index.is_empty() {
            return Err(SearchError::NotConfigured("contacts index name is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(format!("mailroom/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::NotConfigured(format!("failed to create HTTP client: {e}")))?;

        let credentials = config
            .username
            .as_ref()
            .filter(|u| !u.is_empty())
            .map(|u| (u.clone(), config.password.clone()));

        Ok(Self {
            client,
            base_url,
            index: config.contacts_index.clone(),
            keep_alive: config.point_in_time_keep_alive.clone(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> Result<Url, SearchError> {
        self.base_url
            .join(path)
            .map_err(|e| SearchError::NotConfigured(format!("failed to construct URL: {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, password.as_ref()),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, SearchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(SearchError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SearchIndex for ElasticSearchIndex {
    async fn search(&self, org_id: OrgId, body: Value) -> Result<SearchHits, SearchError> {
        let request = if body.get("pit").is_some() {
            // point-in-time searches name no index and take no routing
            self.client.post(self.url("_search")?)
        } else {
            let mut url = self.url(&format!("{}/_search", self.index))?;
            url.query_pairs_mut()
                .append_pair("routing", &org_id.to_string());
            self.client.post(url)
        };

        debug!(org_id = %org_id, body = %body, "Searching contact index");

        let response = self.authorize(request).json(&body).send().await?;
        let raw: RawResponse = Self::check(response).await?.json().await?;
        SearchHits::try_from(raw)
    }

    async fn open_point_in_time(&self, org_id: OrgId) -> Result<String, SearchError> {
        let mut url = self.url(&format!("{}/_pit", self.index))?;
        url.query_pairs_mut()
            .append_pair("keep_alive", &self.keep_alive)
            .append_pair("routing", &org_id.to_string());

        let response = self.authorize(self.client.post(url)).send().await?;
        let opened: OpenPitResponse = Self::check(response).await?.json().await?;
        debug!(org_id = %org_id, "Opened point in time");
        Ok(opened.id)
    }

    async fn close_point_in_time(&self, pit_id: &str) -> Result<(), SearchError> {
        let request = self.client.delete(self.url("_pit")?).json(&json!({ "id": pit_id }));
        let response = self.authorize(request).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
