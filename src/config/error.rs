use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A source couldn't be read, parsed or deserialized
    #[error("Failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// Settings that are valid alone but conflict with each other
    #[error("Inconsistent configuration: {0}")]
    ValidationError(String),
}

impl ConfigurationError {
    pub fn invalid_value(field: &'static str, value: impl ToString, reason: &'static str) -> Self {
        Self::InvalidValue {
            field,
            value: value.to_string(),
            reason,
        }
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
