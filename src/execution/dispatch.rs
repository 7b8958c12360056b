//! SDK response dispatch
//!
//! Inbound events carry an execution context, a type tag and a payload. The
//! [`SdkResponseProcessorRegistry`] maps each tag to the processor that
//! advances node state for it. New event types are supported by registering
//! another processor; the dispatch loop itself never changes.

use crate::core::{ExecutableResponse, ExecutionContext, ExecutionMode, FailureInfo};
use crate::execution::adviser::AdviserResponse;
use crate::execution::error::EngineError;
use crate::execution::strategy::NodeStrategy;
use crate::execution::wait_notify::Responses;
use crate::step::StepResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Event type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SdkResponseEventType {
    FacilitatorResponse,
    StartEventResponse,
    StepResponse,
    ResumeNode,
    AdviserResponse,
    HandleError,
    /// Tag for events handled by processors registered outside this crate
    Custom(String),
}

impl fmt::Display for SdkResponseEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkResponseEventType::FacilitatorResponse => f.write_str("FACILITATOR_RESPONSE"),
            SdkResponseEventType::StartEventResponse => f.write_str("START_EVENT_RESPONSE"),
            SdkResponseEventType::StepResponse => f.write_str("STEP_RESPONSE"),
            SdkResponseEventType::ResumeNode => f.write_str("RESUME_NODE"),
            SdkResponseEventType::AdviserResponse => f.write_str("ADVISER_RESPONSE"),
            SdkResponseEventType::HandleError => f.write_str("HANDLE_ERROR"),
            SdkResponseEventType::Custom(tag) => write!(f, "CUSTOM({})", tag),
        }
    }
}

/// Type-specific event payload
#[derive(Debug, Clone)]
pub enum SdkResponsePayload {
    Facilitation {
        mode: ExecutionMode,
    },
    Executable(ExecutableResponse),
    Step(StepResponse),
    Resume {
        responses: Responses,
        async_error: Option<String>,
    },
    Advice(AdviserResponse),
    Error(FailureInfo),
    Custom(serde_json::Value),
}

/// An inbound asynchronous message about one node execution
#[derive(Debug, Clone)]
pub struct SdkResponseEvent {
    pub context: ExecutionContext,
    pub event_type: SdkResponseEventType,
    pub payload: SdkResponsePayload,
}

impl SdkResponseEvent {
    pub fn new(
        context: ExecutionContext,
        event_type: SdkResponseEventType,
        payload: SdkResponsePayload,
    ) -> Self {
        Self {
            context,
            event_type,
            payload,
        }
    }

    pub fn facilitation(context: ExecutionContext, mode: ExecutionMode) -> Self {
        Self::new(
            context,
            SdkResponseEventType::FacilitatorResponse,
            SdkResponsePayload::Facilitation { mode },
        )
    }

    pub fn start_event(context: ExecutionContext, response: ExecutableResponse) -> Self {
        Self::new(
            context,
            SdkResponseEventType::StartEventResponse,
            SdkResponsePayload::Executable(response),
        )
    }

    pub fn step_response(context: ExecutionContext, response: StepResponse) -> Self {
        Self::new(
            context,
            SdkResponseEventType::StepResponse,
            SdkResponsePayload::Step(response),
        )
    }

    pub fn resume(context: ExecutionContext, responses: Responses, async_error: Option<String>) -> Self {
        Self::new(
            context,
            SdkResponseEventType::ResumeNode,
            SdkResponsePayload::Resume {
                responses,
                async_error,
            },
        )
    }

    pub fn advice(context: ExecutionContext, response: AdviserResponse) -> Self {
        Self::new(
            context,
            SdkResponseEventType::AdviserResponse,
            SdkResponsePayload::Advice(response),
        )
    }

    pub fn error(context: ExecutionContext, failure: FailureInfo) -> Self {
        Self::new(
            context,
            SdkResponseEventType::HandleError,
            SdkResponsePayload::Error(failure),
        )
    }

    /// Key events are sharded by: the node's runtime id, or the plan run for
    /// root-level events
    pub fn routing_key(&self) -> &str {
        self.context
            .current_runtime_id()
            .unwrap_or_else(|| self.context.plan_execution_id())
    }

    fn mismatch(&self) -> EngineError {
        EngineError::InvalidEvent(format!(
            "{} event carried an unexpected payload",
            self.event_type
        ))
    }
}

/// Handles one event type on behalf of the node's strategy
#[async_trait]
pub trait SdkResponseProcessor: Send + Sync {
    async fn handle_event(
        &self,
        strategy: &dyn NodeStrategy,
        event: SdkResponseEvent,
    ) -> Result<(), EngineError>;
}

/// Event type tag to processor lookup
#[derive(Clone, Default)]
pub struct SdkResponseProcessorRegistry {
    processors: HashMap<SdkResponseEventType, Arc<dyn SdkResponseProcessor>>,
}

impl SdkResponseProcessorRegistry {
    /// A registry with no processors
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with the processors for every built-in event type
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(SdkResponseEventType::FacilitatorResponse, Arc::new(FacilitatorResponseProcessor));
        registry.register(SdkResponseEventType::StartEventResponse, Arc::new(StartEventResponseProcessor));
        registry.register(SdkResponseEventType::StepResponse, Arc::new(StepResponseProcessor));
        registry.register(SdkResponseEventType::ResumeNode, Arc::new(ResumeNodeProcessor));
        registry.register(SdkResponseEventType::AdviserResponse, Arc::new(AdviserResponseProcessor));
        registry.register(SdkResponseEventType::HandleError, Arc::new(HandleErrorProcessor));
        registry
    }

    pub fn register(&mut self, event_type: SdkResponseEventType, processor: Arc<dyn SdkResponseProcessor>) {
        self.processors.insert(event_type, processor);
    }

    pub fn get_handler(&self, event_type: &SdkResponseEventType) -> Option<Arc<dyn SdkResponseProcessor>> {
        self.processors.get(event_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

pub struct FacilitatorResponseProcessor;

#[async_trait]
impl SdkResponseProcessor for FacilitatorResponseProcessor {
    async fn handle_event(&self, strategy: &dyn NodeStrategy, event: SdkResponseEvent) -> Result<(), EngineError> {
        let SdkResponsePayload::Facilitation { mode } = event.payload else {
            return Err(event.mismatch());
        };
        strategy.process_facilitation_response(&event.context, mode).await
    }
}

pub struct StartEventResponseProcessor;

#[async_trait]
impl SdkResponseProcessor for StartEventResponseProcessor {
    async fn handle_event(&self, strategy: &dyn NodeStrategy, event: SdkResponseEvent) -> Result<(), EngineError> {
        match event.payload {
            SdkResponsePayload::Executable(response) => {
                strategy.process_start_event_response(&event.context, response).await
            }
            _ => Err(event.mismatch()),
        }
    }
}

pub struct StepResponseProcessor;

#[async_trait]
impl SdkResponseProcessor for StepResponseProcessor {
    async fn handle_event(&self, strategy: &dyn NodeStrategy, event: SdkResponseEvent) -> Result<(), EngineError> {
        match event.payload {
            SdkResponsePayload::Step(response) => {
                strategy.process_step_response(&event.context, response).await
            }
            _ => Err(event.mismatch()),
        }
    }
}

pub struct ResumeNodeProcessor;

#[async_trait]
impl SdkResponseProcessor for ResumeNodeProcessor {
    async fn handle_event(&self, strategy: &dyn NodeStrategy, event: SdkResponseEvent) -> Result<(), EngineError> {
        match event.payload {
            SdkResponsePayload::Resume {
                responses,
                async_error,
            } => {
                strategy
                    .resume_node_execution(&event.context, responses, async_error)
                    .await
            }
            _ => Err(event.mismatch()),
        }
    }
}

pub struct AdviserResponseProcessor;

#[async_trait]
impl SdkResponseProcessor for AdviserResponseProcessor {
    async fn handle_event(&self, strategy: &dyn NodeStrategy, event: SdkResponseEvent) -> Result<(), EngineError> {
        match event.payload {
            SdkResponsePayload::Advice(response) => {
                strategy.process_adviser_response(&event.context, response).await
            }
            _ => Err(event.mismatch()),
        }
    }
}

/// Routes a reported failure into the strategy's error handler
pub struct HandleErrorProcessor;

#[async_trait]
impl SdkResponseProcessor for HandleErrorProcessor {
    async fn handle_event(&self, strategy: &dyn NodeStrategy, event: SdkResponseEvent) -> Result<(), EngineError> {
        match event.payload {
            SdkResponsePayload::Error(failure) => {
                strategy
                    .handle_error(&event.context, EngineError::Reported(failure))
                    .await;
                Ok(())
            }
            _ => Err(event.mismatch()),
        }
    }
}
