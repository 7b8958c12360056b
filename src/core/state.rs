//! Execution status model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Record exists, start has been scheduled
    Queued,
    /// Node is being facilitated or its step is executing
    Running,
    /// Waiting on child node executions
    AsyncWaiting,
    /// Waiting on a remote task
    TaskWaiting,
    Succeeded,
    /// Failed, but an adviser chose to carry on
    IgnoreFailed,
    Failed,
    /// Engine-side failure (dispatch, definition, unsupported operation)
    Errored,
    Aborted,
}

impl Status {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::IgnoreFailed | Status::Failed | Status::Errored | Status::Aborted
        )
    }

    /// Statuses that let a sibling chain continue
    pub fn is_positive(&self) -> bool {
        matches!(self, Status::Succeeded | Status::IgnoreFailed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed | Status::Errored)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Status::AsyncWaiting | Status::TaskWaiting)
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(&self, to: Status) -> bool {
        match self {
            Status::Queued => to == Status::Running || to.is_terminal(),
            Status::Running => to != Status::Queued && to != Status::Running,
            Status::AsyncWaiting | Status::TaskWaiting => {
                to == Status::Running || to.is_waiting() || to.is_terminal()
            }
            _ => false,
        }
    }

    /// Whether an adviser may rewrite this terminal status to `to`
    pub fn can_override_to(&self, to: Status) -> bool {
        self.is_failure() && to == Status::IgnoreFailed
    }

    /// All non-terminal statuses
    pub fn active() -> &'static [Status] {
        &[Status::Queued, Status::Running, Status::AsyncWaiting, Status::TaskWaiting]
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::AsyncWaiting => "ASYNC_WAITING",
            Status::TaskWaiting => "TASK_WAITING",
            Status::Succeeded => "SUCCEEDED",
            Status::IgnoreFailed => "IGNORE_FAILED",
            Status::Failed => "FAILED",
            Status::Errored => "ERRORED",
            Status::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Status::Queued),
            "RUNNING" => Ok(Status::Running),
            "ASYNC_WAITING" => Ok(Status::AsyncWaiting),
            "TASK_WAITING" => Ok(Status::TaskWaiting),
            "SUCCEEDED" => Ok(Status::Succeeded),
            "IGNORE_FAILED" => Ok(Status::IgnoreFailed),
            "FAILED" => Ok(Status::Failed),
            "ERRORED" => Ok(Status::Errored),
            "ABORTED" => Ok(Status::Aborted),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}
