//! Step contracts and the data that flows through them
//!
//! A step implementation conforms to one of three executable shapes
//! (see [`executable`]): synchronous, single remote task, or a chain of
//! remote tasks. Each shape gates the step's own logic behind resource
//! validation and runs it inside a scoped security context.

pub mod builtin;
pub mod executable;
pub mod registry;
pub mod response;

pub use executable::{
    Executable, SyncExecutableWithRbac, TaskChainExecutableWithRbac, TaskExecutableWithRbac,
};
pub use registry::StepRegistry;
pub use response::{ResponseData, ResponseHandle, TaskResult};

use crate::core::{FailureInfo, FailureKind, Status};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Error types for step operations
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Access denied: '{principal}' lacks '{permission}' on {resource}")]
    AccessDenied {
        principal: String,
        permission: String,
        resource: String,
    },

    #[error("Invalid step parameters: {0}")]
    InvalidParameters(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StepError {
    /// Failure classification recorded on the node
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StepError::AccessDenied { .. } => FailureKind::Authorization,
            StepError::InvalidParameters(_) => FailureKind::Definition,
            StepError::TaskFailed(_) => FailureKind::Task,
            StepError::UnexpectedResponse(_) | StepError::Internal(_) => FailureKind::Application,
        }
    }

    pub fn to_failure_info(&self) -> FailureInfo {
        FailureInfo::new(self.failure_kind(), self.to_string())
    }
}

/// Step-type-specific configuration resolved for one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepParameters(serde_json::Value);

impl StepParameters {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Deserialize into the step's own parameter type
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        let value = if self.0.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.0.clone()
        };
        serde_json::from_value(value).map_err(|e| StepError::InvalidParameters(e.to_string()))
    }
}

/// Inputs resolved for a step invocation
///
/// `previous` holds the outcomes of the sibling that ran immediately before.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInputPackage {
    pub previous: serde_json::Map<String, serde_json::Value>,
}

/// Opaque state a task chain carries from one link to the next
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassThroughData(pub serde_json::Value);

impl PassThroughData {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| StepError::Internal(format!("Corrupt pass-through data: {}", e)))
    }
}

/// Final result of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: Status,
    pub failure_info: Option<FailureInfo>,
    #[serde(default)]
    pub outcomes: serde_json::Map<String, serde_json::Value>,
}

impl StepResponse {
    pub fn succeeded() -> Self {
        Self {
            status: Status::Succeeded,
            failure_info: None,
            outcomes: serde_json::Map::new(),
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            failure_info: Some(FailureInfo::new(kind, message)),
            outcomes: serde_json::Map::new(),
        }
    }

    pub fn with_outcome(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outcomes.insert(key.into(), value);
        self
    }
}

impl From<StepError> for StepResponse {
    fn from(error: StepError) -> Self {
        StepResponse::failed(error.failure_kind(), error.to_string())
    }
}

/// Description of a remote task for the engine to dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Kind of task, interpreted by the task executor
    pub task_type: String,

    /// Task payload
    pub parameters: serde_json::Value,

    /// Per-task timeout; the executor default applies when absent
    pub timeout_secs: Option<u64>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Result of one chain link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskChainResponse {
    pub chain_end: bool,
    pub task_request: Option<TaskRequest>,
    pub pass_through: PassThroughData,
}

impl TaskChainResponse {
    /// Dispatch `request` and keep the chain going
    pub fn next(request: TaskRequest, pass_through: PassThroughData) -> Self {
        Self {
            chain_end: false,
            task_request: Some(request),
            pass_through,
        }
    }

    /// Dispatch `request` as the last link
    pub fn last(request: TaskRequest, pass_through: PassThroughData) -> Self {
        Self {
            chain_end: true,
            task_request: Some(request),
            pass_through,
        }
    }

    /// End the chain without another task
    pub fn end(pass_through: PassThroughData) -> Self {
        Self {
            chain_end: true,
            task_request: None,
            pass_through,
        }
    }
}
