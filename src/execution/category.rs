//! Node categories
//!
//! A [`NodeCategoryHandler`] is the only part of node orchestration that
//! differs between plan, stage, step and fork nodes: which strategy
//! operations apply to the category and how a queued record is materialized.

use crate::core::{
    ExecutionContext, ExecutionLinks, InitiateMetadata, Node, NodeCategory, NodeExecution,
};
use crate::execution::error::EngineError;
use std::fmt;

/// Strategy operations gated per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    InitiateNode,
    RunNode,
    RunNextNode,
    StartExecution,
    ProcessFacilitationResponse,
    ProcessStartEventResponse,
    ResumeNodeExecution,
    ProcessStepResponse,
    ConcludeExecution,
    ProcessAdviserResponse,
    EndNodeExecution,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Operation::InitiateNode,
        Operation::RunNode,
        Operation::RunNextNode,
        Operation::StartExecution,
        Operation::ProcessFacilitationResponse,
        Operation::ProcessStartEventResponse,
        Operation::ResumeNodeExecution,
        Operation::ProcessStepResponse,
        Operation::ConcludeExecution,
        Operation::ProcessAdviserResponse,
        Operation::EndNodeExecution,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::InitiateNode => "initiate_node",
            Operation::RunNode => "run_node",
            Operation::RunNextNode => "run_next_node",
            Operation::StartExecution => "start_execution",
            Operation::ProcessFacilitationResponse => "process_facilitation_response",
            Operation::ProcessStartEventResponse => "process_start_event_response",
            Operation::ResumeNodeExecution => "resume_node_execution",
            Operation::ProcessStepResponse => "process_step_response",
            Operation::ConcludeExecution => "conclude_execution",
            Operation::ProcessAdviserResponse => "process_adviser_response",
            Operation::EndNodeExecution => "end_node_execution",
        };
        f.write_str(name)
    }
}

pub trait NodeCategoryHandler: Send + Sync + 'static {
    fn category(&self) -> NodeCategory;

    /// Whether `operation` applies to nodes of this category
    fn supports(&self, operation: Operation) -> bool;

    /// Materialize the queued record for `node` running under `context`
    fn create_node_execution(
        &self,
        context: &ExecutionContext,
        node: &Node,
        metadata: &InitiateMetadata,
        links: ExecutionLinks,
    ) -> Result<NodeExecution, EngineError>;

    /// Fail with `Unsupported` unless `operation` applies
    fn ensure_supported(&self, operation: Operation) -> Result<(), EngineError> {
        if self.supports(operation) {
            Ok(())
        } else {
            Err(EngineError::Unsupported {
                operation,
                category: self.category(),
            })
        }
    }
}

fn queued(
    context: &ExecutionContext,
    node: &Node,
    metadata: &InitiateMetadata,
    links: ExecutionLinks,
) -> Result<NodeExecution, EngineError> {
    NodeExecution::queued(context, node, metadata, links).ok_or(EngineError::EmptyContext)
}

/// Root of a plan run; never has siblings and never runs steps itself
pub struct PlanCategory;

impl NodeCategoryHandler for PlanCategory {
    fn category(&self) -> NodeCategory {
        NodeCategory::Plan
    }

    fn supports(&self, operation: Operation) -> bool {
        !matches!(
            operation,
            Operation::RunNextNode | Operation::ProcessStepResponse
        )
    }

    fn create_node_execution(
        &self,
        context: &ExecutionContext,
        node: &Node,
        metadata: &InitiateMetadata,
        links: ExecutionLinks,
    ) -> Result<NodeExecution, EngineError> {
        if context.levels().len() != 1 {
            return Err(EngineError::InvalidPlacement(format!(
                "plan node '{}' must be the root of its run",
                node.identifier
            )));
        }
        queued(context, node, metadata, links)
    }
}

pub struct StageCategory;

impl NodeCategoryHandler for StageCategory {
    fn category(&self) -> NodeCategory {
        NodeCategory::Stage
    }

    fn supports(&self, operation: Operation) -> bool {
        operation != Operation::ProcessStepResponse
    }

    fn create_node_execution(
        &self,
        context: &ExecutionContext,
        node: &Node,
        metadata: &InitiateMetadata,
        links: ExecutionLinks,
    ) -> Result<NodeExecution, EngineError> {
        let mut execution = queued(context, node, metadata, links)?;
        execution.tags.insert("stage".to_string(), node.identifier.clone());
        Ok(execution)
    }
}

pub struct StepCategory;

impl NodeCategoryHandler for StepCategory {
    fn category(&self) -> NodeCategory {
        NodeCategory::Step
    }

    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    fn create_node_execution(
        &self,
        context: &ExecutionContext,
        node: &Node,
        metadata: &InitiateMetadata,
        links: ExecutionLinks,
    ) -> Result<NodeExecution, EngineError> {
        let mut execution = queued(context, node, metadata, links)?;
        execution
            .tags
            .insert("step_type".to_string(), node.step_type.to_string());
        Ok(execution)
    }
}

/// Runs every child in parallel and aggregates their statuses
pub struct ForkCategory;

impl NodeCategoryHandler for ForkCategory {
    fn category(&self) -> NodeCategory {
        NodeCategory::Fork
    }

    fn supports(&self, operation: Operation) -> bool {
        operation != Operation::ProcessStepResponse
    }

    fn create_node_execution(
        &self,
        context: &ExecutionContext,
        node: &Node,
        metadata: &InitiateMetadata,
        links: ExecutionLinks,
    ) -> Result<NodeExecution, EngineError> {
        let mut execution = queued(context, node, metadata, links)?;
        execution
            .tags
            .insert("branches".to_string(), node.child_node_ids.len().to_string());
        Ok(execution)
    }
}
