//! Engine error types

use crate::core::{FailureInfo, FailureKind, NodeCategory, Status};
use crate::execution::category::Operation;
use crate::execution::dispatch::SdkResponseEventType;
use crate::step::StepError;
use thiserror::Error;

/// Errors raised while driving node executions
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Plan '{0}' not found")]
    PlanNotFound(String),

    #[error("Node '{node_id}' not found in plan '{plan_id}'")]
    NodeNotFound { plan_id: String, node_id: String },

    #[error("Node execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("{operation} is not supported for {category} nodes")]
    Unsupported {
        operation: Operation,
        category: NodeCategory,
    },

    #[error("No executable registered for step type '{0}'")]
    UnknownStepType(String),

    #[error("Execution context has no current level")]
    EmptyContext,

    #[error("Invalid node placement: {0}")]
    InvalidPlacement(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("No processor registered for {0} events")]
    NoProcessor(SdkResponseEventType),

    #[error("Illegal status change {from} -> {to} for '{execution_id}'")]
    IllegalTransition {
        execution_id: String,
        from: Status,
        to: Status,
    },

    #[error("Task dispatch failed: {0}")]
    TaskDispatch(String),

    #[error("Worker pool is closed")]
    WorkerPoolClosed,

    #[error("Engine has shut down")]
    EngineShutDown,

    /// A failure reported for a node from another part of the engine
    #[error("{}", .0.message)]
    Reported(FailureInfo),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            EngineError::Step(e) => e.failure_kind(),
            EngineError::Reported(info) => info.kind,
            EngineError::PlanNotFound(_)
            | EngineError::NodeNotFound { .. }
            | EngineError::Unsupported { .. }
            | EngineError::UnknownStepType(_)
            | EngineError::EmptyContext
            | EngineError::InvalidPlacement(_) => FailureKind::Definition,
            _ => FailureKind::Dispatch,
        }
    }

    /// Status a node is marked with when this error reaches `handle_error`
    pub fn terminal_status(&self) -> Status {
        match self {
            EngineError::Step(_) => Status::Failed,
            EngineError::Reported(info) if info.kind != FailureKind::Dispatch
                && info.kind != FailureKind::Definition => Status::Failed,
            _ => Status::Errored,
        }
    }

    pub fn to_failure_info(&self) -> FailureInfo {
        match self {
            EngineError::Reported(info) => info.clone(),
            other => FailureInfo::new(other.failure_kind(), other.to_string()),
        }
    }
}
