//! Advisers decide what follows a concluded node

use crate::core::{AdviserObtainment, FailureKind, NodeExecution};
use serde::{Deserialize, Serialize};

/// Decision returned by an adviser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdviserResponse {
    /// Start the named sibling
    NextStep { next_node_id: String },

    /// Run the same node again as attempt `retry_index`
    Retry { retry_index: u32 },

    /// Record the failure as `IgnoreFailed`
    IgnoreFailure,
}

pub trait Adviser: Send + Sync {
    fn can_advise(&self, execution: &NodeExecution) -> bool;

    fn on_advise_event(&self, execution: &NodeExecution) -> AdviserResponse;
}

pub struct NextStepAdviser {
    next_node_id: String,
}

impl Adviser for NextStepAdviser {
    fn can_advise(&self, execution: &NodeExecution) -> bool {
        execution.status.is_positive()
    }

    fn on_advise_event(&self, _execution: &NodeExecution) -> AdviserResponse {
        AdviserResponse::NextStep {
            next_node_id: self.next_node_id.clone(),
        }
    }
}

/// Retries failed attempts; configuration and authorization failures are final
pub struct RetryAdviser {
    max_retries: u32,
}

impl Adviser for RetryAdviser {
    fn can_advise(&self, execution: &NodeExecution) -> bool {
        let retryable = !matches!(
            execution.failure_info.as_ref().map(|f| f.kind),
            Some(FailureKind::Definition | FailureKind::Authorization)
        );
        execution.status.is_failure() && retryable && execution.retry_index < self.max_retries
    }

    fn on_advise_event(&self, execution: &NodeExecution) -> AdviserResponse {
        AdviserResponse::Retry {
            retry_index: execution.retry_index + 1,
        }
    }
}

pub struct IgnoreFailureAdviser;

impl Adviser for IgnoreFailureAdviser {
    fn can_advise(&self, execution: &NodeExecution) -> bool {
        execution.status.is_failure()
    }

    fn on_advise_event(&self, _execution: &NodeExecution) -> AdviserResponse {
        AdviserResponse::IgnoreFailure
    }
}

/// Build the adviser a node's obtainment describes
pub fn obtain(obtainment: &AdviserObtainment) -> Box<dyn Adviser> {
    match obtainment {
        AdviserObtainment::NextStep { next_node_id } => Box::new(NextStepAdviser {
            next_node_id: next_node_id.clone(),
        }),
        AdviserObtainment::Retry { max_retries } => Box::new(RetryAdviser {
            max_retries: *max_retries,
        }),
        AdviserObtainment::IgnoreFailure => Box::new(IgnoreFailureAdviser),
    }
}

/// Consult advisers in order; the first that can advise decides
pub fn advise(obtainments: &[AdviserObtainment], execution: &NodeExecution) -> Option<AdviserResponse> {
    obtainments
        .iter()
        .map(obtain)
        .find(|adviser| adviser.can_advise(execution))
        .map(|adviser| adviser.on_advise_event(execution))
}
