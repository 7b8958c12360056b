//! Node execution engine

pub mod adviser;
pub mod category;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod strategy;
pub mod task;
pub mod wait_notify;
pub mod worker_pool;

pub use adviser::{Adviser, AdviserResponse};
pub use category::{NodeCategoryHandler, Operation};
pub use dispatch::{
    SdkResponseEvent, SdkResponseEventType, SdkResponsePayload, SdkResponseProcessor,
    SdkResponseProcessorRegistry,
};
pub use engine::{EngineBuilder, EngineEvent, EventHandler, OrchestrationEngine, PlanRun};
pub use error::EngineError;
pub use strategy::{NodeExecutionStrategy, NodeStrategy};
pub use task::{LocalTaskExecutor, TaskExecutor, TaskResultReporter};
pub use wait_notify::{Responses, WaitNotifyEngine};
