//! Results delivered back to a waiting step

use crate::core::{FailureInfo, Status};
use crate::step::StepError;
use serde::{Deserialize, Serialize};

/// Outcome of a remote task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskResult {
    Success(serde_json::Value),
    Failure { message: String },
}

impl TaskResult {
    pub fn failure(message: impl Into<String>) -> Self {
        TaskResult::Failure {
            message: message.into(),
        }
    }
}

/// A response a waiting node is resumed with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    Task(TaskResult),
    Child {
        execution_id: String,
        status: Status,
        failure_info: Option<FailureInfo>,
    },
}

#[derive(Debug)]
enum HandleState {
    Ready(ResponseData),
    Empty,
}

/// Access to a task or child result
///
/// Resolving it is the only point where the step observes remote failure.
#[derive(Debug)]
pub struct ResponseHandle {
    state: HandleState,
}

impl ResponseHandle {
    pub fn ready(data: ResponseData) -> Self {
        Self {
            state: HandleState::Ready(data),
        }
    }

    /// A handle with nothing behind it, e.g. a chain that ended without a task
    pub fn empty() -> Self {
        Self {
            state: HandleState::Empty,
        }
    }

    /// Resolve the response
    pub async fn resolve(self) -> Result<Option<ResponseData>, StepError> {
        match self.state {
            HandleState::Ready(data) => Ok(Some(data)),
            HandleState::Empty => Ok(None),
        }
    }

    /// Resolve a task result, turning remote failure into `StepError::TaskFailed`
    pub async fn task_output(self) -> Result<serde_json::Value, StepError> {
        match self.resolve().await? {
            Some(ResponseData::Task(TaskResult::Success(value))) => Ok(value),
            Some(ResponseData::Task(TaskResult::Failure { message })) => {
                Err(StepError::TaskFailed(message))
            }
            Some(ResponseData::Child { .. }) => Err(StepError::UnexpectedResponse(
                "expected a task result, got a child outcome".to_string(),
            )),
            None => Err(StepError::UnexpectedResponse(
                "expected a task result, got nothing".to_string(),
            )),
        }
    }
}
