use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a flow start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    /// Created, audience not yet resolved
    Pending,
    /// Audience resolved, batches being queued or executed
    Starting,
    /// Every resolved contact has been settled
    Complete,
    /// Resolution failed or nothing could be queued
    Failed,
}

impl StartStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Single-character code stored in the database
    pub fn code(&self) -> &'static str {
        match self {
            Self::Pending => "P",
            Self::Starting => "S",
            Self::Complete => "C",
            Self::Failed => "F",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, String> {
        match code {
            "P" => Ok(Self::Pending),
            "S" => Ok(Self::Starting),
            "C" => Ok(Self::Complete),
            "F" => Ok(Self::Failed),
            _ => Err(format!("Invalid start status code: {code}")),
        }
    }
}

impl fmt::Display for StartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Starting => write!(f, "starting"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for StartStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "starting" => Ok(Self::Starting),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid start status: {s}")),
        }
    }
}

/// Evaluation status of a smart (query-based) group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Created, membership never evaluated
    Initializing,
    /// Membership is being recomputed
    Evaluating,
    /// Membership reflects the query
    Ready,
}

impl GroupStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Initializing => "I",
            Self::Evaluating => "V",
            Self::Ready => "R",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, String> {
        match code {
            "I" => Ok(Self::Initializing),
            "V" => Ok(Self::Evaluating),
            "R" => Ok(Self::Ready),
            _ => Err(format!("Invalid group status code: {code}")),
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::Ready => write!(f, "ready"),
        }
    }
}
