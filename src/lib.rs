//! node-engine - node execution engine for delivery pipelines

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod security;
pub mod step;

// Re-export commonly used types
pub use core::{ExecutionContext, ExecutionSetup, Node, NodeCategory, NodeExecution, Plan, Status};
pub use execution::{EngineError, EngineEvent, OrchestrationEngine, PlanRun};
pub use persistence::{InMemoryNodeExecutionStore, InMemoryPlanService, NodeExecutionStore, PlanService};
pub use step::{Executable, StepRegistry};
