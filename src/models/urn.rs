//! # Contact URNs
//!
//! A URN is a scheme-qualified contact address such as `tel:+15551234567`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// URN schemes a contact can be reached on
pub const KNOWN_SCHEMES: &[&str] = &[
    "tel", "whatsapp", "facebook", "telegram", "twitter", "instagram", "viber", "line", "mailto",
    "ext",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn {
    scheme: String,
    path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrnError {
    #[error("URN '{0}' is missing a scheme")]
    MissingScheme(String),
    #[error("URN scheme '{0}' is not supported")]
    UnknownScheme(String),
    #[error("URN '{0}' has an empty path")]
    EmptyPath(String),
}

impl Urn {
    pub fn new(scheme: &str, path: &str) -> Result<Self, UrnError> {
        let scheme = scheme.trim().to_lowercase();
        if !is_scheme(&scheme) {
            return Err(UrnError::UnknownScheme(scheme));
        }
        let path = normalize_path(&scheme, path);
        if path.is_empty() {
            return Err(UrnError::EmptyPath(format!("{scheme}:")));
        }
        Ok(Self { scheme, path })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Identity used for uniqueness within an org (`scheme:path`)
    pub fn identity(&self) -> String {
        self.to_string()
    }
}

pub fn is_scheme(key: &str) -> bool {
    KNOWN_SCHEMES.contains(&key)
}

fn normalize_path(scheme: &str, path: &str) -> String {
    let path = path.trim();
    match scheme {
        // phone numbers lose formatting characters
        "tel" | "whatsapp" => path
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect(),
        "mailto" | "twitter" | "instagram" => path.to_lowercase(),
        _ => path.to_string(),
    }
}

impl FromStr for Urn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, path) = s
            .split_once(':')
            .ok_or_else(|| UrnError::MissingScheme(s.to_string()))?;
        Self::new(scheme, path)
    }
}

impl TryFrom<String> for Urn {
    type Error = UrnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Urn> for String {
    fn from(urn: Urn) -> Self {
        urn.to_string()
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path)
    }
}
