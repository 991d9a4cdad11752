//! # Error Types
//!
//! Crate-wide error handling. Query errors are user-facing and must never be
//! confused with infrastructure failures, so they keep their own type all the
//! way up to [`MailroomError`].

use std::fmt;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::query_builder::QueryError;
use crate::search::SearchError;

/// The step of recipient resolution that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    /// Loading explicit contacts or get-or-create by URN
    ContactLookup,
    /// Loading group memberships from the authoritative store
    GroupQuery,
    /// Resolving the built query through the search index
    Search,
}

impl fmt::Display for ResolutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContactLookup => write!(f, "contact lookup"),
            Self::GroupQuery => write!(f, "group query"),
            Self::Search => write!(f, "search"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MailroomError {
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("Error during {step}: {source}")]
    Resolution {
        step: ResolutionStep,
        #[source]
        source: Box<MailroomError>,
    },

    #[error("Flow engine error: {0}")]
    FlowEngine(String),
}

impl MailroomError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn state_transition(message: impl Into<String>) -> Self {
        Self::StateTransition(message.into())
    }

    /// Annotate an error with the resolution step it came from
    pub fn during(step: ResolutionStep, source: impl Into<MailroomError>) -> Self {
        Self::Resolution {
            step,
            source: Box::new(source.into()),
        }
    }

    /// The query error underneath this error, if it is one
    pub fn query_error(&self) -> Option<&QueryError> {
        match self {
            Self::Query(e) => Some(e),
            Self::Search(SearchError::Query(e)) => Some(e),
            Self::Resolution { source, .. } => source.query_error(),
            _ => None,
        }
    }

    pub fn is_query_error(&self) -> bool {
        self.query_error().is_some()
    }

    /// Message safe to show to the caller: the parser's message for query
    /// errors, a generic message for everything else.
    pub fn user_message(&self) -> String {
        match self.query_error() {
            Some(e) => e.to_string(),
            None => "an internal error occurred, please try again later".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MailroomError>;
