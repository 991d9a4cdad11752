use thiserror::Error;

use super::ast::Operator;

/// Problems with a contact query. These are user errors: the message is
/// shown to whoever wrote the query and the operation is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("mismatched input at '{near}': {message}")]
    Syntax { near: String, message: String },

    #[error("can't resolve '{0}' to attribute, scheme or field")]
    UnknownProperty(String),

    #[error("operator '{operator}' is not supported for '{key}'")]
    UnsupportedOperator { key: String, operator: Operator },

    #[error("can't convert '{0}' to a number")]
    InvalidNumber(String),

    #[error("can't convert '{0}' to a date")]
    InvalidDate(String),

    #[error("'{0}' is not a valid group name")]
    UnknownGroup(String),

    #[error("'{0}' is not a valid flow name")]
    UnknownFlow(String),

    #[error("'{0}' is not a valid contact status")]
    InvalidStatus(String),
}

impl QueryError {
    pub fn syntax(near: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            near: near.into(),
            message: message.into(),
        }
    }

    pub fn unknown_property(key: impl Into<String>) -> Self {
        Self::UnknownProperty(key.into())
    }

    pub fn unsupported_operator(key: impl Into<String>, operator: Operator) -> Self {
        Self::UnsupportedOperator {
            key: key.into(),
            operator,
        }
    }
}
