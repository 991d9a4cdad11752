use serde::{Deserialize, Serialize};

use super::states::{GroupStatus, StartStatus};
use crate::error::{MailroomError, Result};

/// Events that move a flow start through its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StartEvent {
    /// Audience resolved with this many contacts
    Begin { contact_count: usize },
    /// All resolved contacts settled
    Complete,
    /// Start could not proceed
    Fail(String),
}

impl StartEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "begin",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
        }
    }

    /// The status this event leads to from `from`, or an error if the
    /// transition is not allowed.
    pub fn apply(&self, from: StartStatus) -> Result<StartStatus> {
        let to = match (from, self) {
            (StartStatus::Pending, Self::Begin { .. }) => StartStatus::Starting,
            (StartStatus::Pending | StartStatus::Starting, Self::Complete) => StartStatus::Complete,
            (StartStatus::Pending | StartStatus::Starting, Self::Fail(_)) => StartStatus::Failed,
            _ => {
                return Err(MailroomError::state_transition(format!(
                    "cannot {} a start that is {from}",
                    self.event_type()
                )))
            }
        };
        Ok(to)
    }
}

/// Events that move a smart group through evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupEvent {
    BeginEvaluation,
    FinishEvaluation,
}

impl GroupEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BeginEvaluation => "begin_evaluation",
            Self::FinishEvaluation => "finish_evaluation",
        }
    }

    pub fn apply(&self, from: GroupStatus) -> Result<GroupStatus> {
        match (from, self) {
            (GroupStatus::Initializing | GroupStatus::Ready, Self::BeginEvaluation) => {
                Ok(GroupStatus::Evaluating)
            }
            // a previous evaluation that failed leaves the group evaluating,
            // a retry is allowed to pick it up again
            (GroupStatus::Evaluating, Self::BeginEvaluation) => Ok(GroupStatus::Evaluating),
            (GroupStatus::Evaluating, Self::FinishEvaluation) => Ok(GroupStatus::Ready),
            _ => Err(MailroomError::state_transition(format!(
                "cannot {} a group that is {from}",
                self.event_type()
            ))),
        }
    }
}
