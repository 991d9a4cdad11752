//! # Search
//!
//! Contact resolution through the external search index. The index lags the
//! relational store, so everything here is a best-effort read: callers that
//! need authoritative data (explicit contacts, group members) read the store
//! directly.
//!
//! - [`index`] - the low-level index contract and response types
//! - [`elastic`] - Elasticsearch implementation over HTTP
//! - [`translate`] - contact query AST to index query
//! - [`resolver`] - paged and scrolled id resolution

pub mod elastic;
pub mod index;
pub mod resolver;
pub mod translate;

pub use elastic::ElasticSearchIndex;
pub use index::{SearchHit, SearchHits, SearchIndex};
pub use resolver::{ResolvedPage, SearchResolver, SearchSettings};

use thiserror::Error;

use crate::query_builder::QueryError;

/// Errors from resolving a query. [`SearchError::Query`] is the caller's
/// mistake and must not be retried; everything else is infrastructure.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("search index unreachable: {0}")]
    Transport(String),

    #[error("search index returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected search index response: {0}")]
    Decode(String),

    #[error("search index request timed out")]
    Timeout,

    #[error("search index not configured: {0}")]
    NotConfigured(String),

    /// Paged searches can't reach past the result window
    #[error("page of {size} at offset {offset} is beyond the result window of {max_result_window}")]
    PageOutOfRange {
        offset: usize,
        size: usize,
        max_result_window: usize,
    },
}

impl SearchError {
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::Query(_))
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
