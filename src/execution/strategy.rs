//! Node execution strategy
//!
//! [`NodeExecutionStrategy`] holds the orchestration shared by every node
//! category: creating and scheduling node executions, processing the events
//! that drive them to a terminal status, consulting advisers and notifying
//! whoever waits on the node. The category it is parameterized with decides
//! which operations apply and how records are materialized.
//!
//! No operation lets an error escape across the scheduling boundary: failures
//! end up in [`NodeStrategy::handle_error`], which fails the affected node.

use crate::core::{
    ExecutableResponse, ExecutionContext, ExecutionLinks, ExecutionMode, FailureInfo, FailureKind,
    InitiateMetadata, Level, Node, NodeCategory, NodeExecution, Status,
};
use crate::execution::adviser::{self, AdviserResponse};
use crate::execution::category::{NodeCategoryHandler, Operation};
use crate::execution::dispatch::SdkResponseEvent;
use crate::execution::engine::{EngineEvent, OrchestrationEngine};
use crate::execution::error::EngineError;
use crate::execution::wait_notify::Responses;
use crate::execution::worker_pool::Job;
use crate::step::{ResponseData, StepResponse};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Operations every node strategy offers
#[async_trait]
pub trait NodeStrategy: Send + Sync {
    fn category(&self) -> NodeCategory;

    fn supports(&self, operation: Operation) -> bool;

    /// Fetch `node_id`, derive its context under `context` and run it
    ///
    /// Failures are routed to `handle_error` for `context`; `None` is returned.
    async fn initiate_node(
        &self,
        context: &ExecutionContext,
        node_id: &str,
        runtime_id: &str,
        metadata: InitiateMetadata,
    ) -> Option<NodeExecution>;

    /// Persist a queued execution for `node` and schedule its start
    async fn run_node(
        &self,
        context: &ExecutionContext,
        node: &Node,
        metadata: InitiateMetadata,
    ) -> Result<NodeExecution, EngineError>;

    /// Like `run_node`, continuing the sibling chain of `previous`
    async fn run_next_node(
        &self,
        context: &ExecutionContext,
        node: &Node,
        previous: &NodeExecution,
        metadata: InitiateMetadata,
    ) -> Result<NodeExecution, EngineError>;

    async fn handle_sdk_response_event(&self, event: SdkResponseEvent);

    async fn handle_error(&self, context: &ExecutionContext, error: EngineError);

    async fn start_execution(&self, context: &ExecutionContext) -> Result<(), EngineError>;

    async fn process_facilitation_response(
        &self,
        context: &ExecutionContext,
        mode: ExecutionMode,
    ) -> Result<(), EngineError>;

    async fn process_start_event_response(
        &self,
        context: &ExecutionContext,
        response: ExecutableResponse,
    ) -> Result<(), EngineError>;

    async fn resume_node_execution(
        &self,
        context: &ExecutionContext,
        responses: Responses,
        async_error: Option<String>,
    ) -> Result<(), EngineError>;

    async fn process_step_response(
        &self,
        context: &ExecutionContext,
        response: StepResponse,
    ) -> Result<(), EngineError>;

    /// Move the node to terminal status `to` if it is currently in `from`
    ///
    /// Returns the concluded record, or `None` when the status had moved on.
    async fn conclude_execution(
        &self,
        context: &ExecutionContext,
        to: Status,
        from: &[Status],
        failure_info: Option<FailureInfo>,
    ) -> Result<Option<NodeExecution>, EngineError>;

    async fn process_adviser_response(
        &self,
        context: &ExecutionContext,
        response: AdviserResponse,
    ) -> Result<(), EngineError>;

    /// Notify the node's waiter, or complete the plan run for a root node
    async fn end_node_execution(&self, context: &ExecutionContext) -> Result<(), EngineError>;
}

pub struct NodeExecutionStrategy<C> {
    category: C,
    engine: Weak<OrchestrationEngine>,
}

impl<C: NodeCategoryHandler> NodeExecutionStrategy<C> {
    pub fn new(category: C, engine: Weak<OrchestrationEngine>) -> Self {
        Self { category, engine }
    }

    fn engine(&self) -> Result<Arc<OrchestrationEngine>, EngineError> {
        self.engine.upgrade().ok_or(EngineError::EngineShutDown)
    }

    fn runtime_id(context: &ExecutionContext) -> Result<&str, EngineError> {
        context.current_runtime_id().ok_or(EngineError::EmptyContext)
    }

    async fn load(
        engine: &OrchestrationEngine,
        context: &ExecutionContext,
    ) -> Result<NodeExecution, EngineError> {
        let runtime_id = Self::runtime_id(context)?;
        engine
            .store()
            .get(runtime_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(runtime_id.to_string()))
    }

    async fn fetch_node(
        engine: &OrchestrationEngine,
        context: &ExecutionContext,
        node_id: &str,
    ) -> Result<Node, EngineError> {
        engine
            .plan_service()
            .fetch_node(context.plan_id(), node_id)
            .await?
            .ok_or_else(|| EngineError::NodeNotFound {
                plan_id: context.plan_id().to_string(),
                node_id: node_id.to_string(),
            })
    }

    /// Persist a new record, then hand its start to the worker pool
    async fn persist_and_schedule(
        &self,
        engine: &OrchestrationEngine,
        execution: NodeExecution,
        previous_id: Option<&str>,
    ) -> Result<NodeExecution, EngineError> {
        engine.store().create(&execution).await?;

        if let Some(previous_id) = previous_id {
            let next_id = execution.uuid.clone();
            engine
                .store()
                .update(previous_id, &move |previous: &mut NodeExecution| {
                    previous.next_id = Some(next_id.clone());
                    true
                })
                .await?;
        }

        info!(
            "Queued {} '{}' ({})",
            execution.category, execution.identifier, execution.uuid
        );
        engine.emit(EngineEvent::NodeQueued {
            execution_id: execution.uuid.clone(),
            identifier: execution.identifier.clone(),
            category: execution.category,
            retry_index: execution.retry_index,
        });

        let job = Job::StartNode {
            context: execution.context.clone(),
        };
        if let Err(error) = engine.submit(job).await {
            self.handle_error(&execution.context, error).await;
        }
        Ok(execution)
    }

    /// Conclude, then ask the node's advisers what comes next
    async fn conclude_and_advise(
        &self,
        engine: &OrchestrationEngine,
        context: &ExecutionContext,
        to: Status,
        from: &[Status],
        failure_info: Option<FailureInfo>,
    ) -> Result<(), EngineError> {
        match self.conclude_execution(context, to, from, failure_info).await? {
            Some(execution) => self.advise(engine, context, &execution).await,
            None => Ok(()),
        }
    }

    async fn advise(
        &self,
        engine: &OrchestrationEngine,
        context: &ExecutionContext,
        execution: &NodeExecution,
    ) -> Result<(), EngineError> {
        let node = Self::fetch_node(engine, context, &execution.node_id).await?;
        match adviser::advise(&node.advisers, execution) {
            Some(advice) => {
                debug!("Advice for {}: {:?}", context.describe(), advice);
                engine.publish(SdkResponseEvent::advice(context.clone(), advice))
            }
            None => self.end_node_execution(context).await,
        }
    }

    /// Tell the waiter of `execution` it ended with `status`
    fn notify_end(
        engine: &OrchestrationEngine,
        execution: &NodeExecution,
        status: Status,
        failure_info: Option<FailureInfo>,
    ) {
        match &execution.notify_id {
            Some(notify_id) => {
                debug!("{} notifies {} with {}", execution.uuid, notify_id, status);
                engine.wait_notify().notify(
                    notify_id,
                    ResponseData::Child {
                        execution_id: execution.uuid.clone(),
                        status,
                        failure_info,
                    },
                );
            }
            None if execution.parent_id.is_none() => {
                engine.complete_plan_run(execution.context.plan_execution_id(), status);
            }
            None => warn!("{} has a parent but nothing to notify", execution.uuid),
        }
    }

    /// Status and failure a parent concludes with, given its children's outcomes
    ///
    /// Every child must be positive; otherwise the first failing child, in
    /// `order`, explains the failure.
    fn aggregate(order: &[String], responses: &Responses) -> (Status, Option<FailureInfo>) {
        for id in order {
            match responses.get(id) {
                Some(ResponseData::Child { status, .. }) if status.is_positive() => continue,
                Some(ResponseData::Child {
                    execution_id,
                    status,
                    failure_info,
                }) => {
                    let failure = match failure_info {
                        Some(info) => info.clone(),
                        None => FailureInfo::new(
                            FailureKind::Application,
                            format!("child {} ended {}", execution_id, status),
                        ),
                    };
                    return (Status::Failed, Some(failure));
                }
                Some(other) => {
                    return (
                        Status::Failed,
                        Some(FailureInfo::new(
                            FailureKind::Dispatch,
                            format!("unexpected response for child {}: {:?}", id, other),
                        )),
                    )
                }
                None => {
                    return (
                        Status::Failed,
                        Some(FailureInfo::new(
                            FailureKind::Dispatch,
                            format!("no response for child {}", id),
                        )),
                    )
                }
            }
        }
        (Status::Succeeded, None)
    }
}

fn new_runtime_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl<C: NodeCategoryHandler> NodeStrategy for NodeExecutionStrategy<C> {
    fn category(&self) -> NodeCategory {
        self.category.category()
    }

    fn supports(&self, operation: Operation) -> bool {
        self.category.supports(operation)
    }

    async fn initiate_node(
        &self,
        context: &ExecutionContext,
        node_id: &str,
        runtime_id: &str,
        metadata: InitiateMetadata,
    ) -> Option<NodeExecution> {
        let result: Result<NodeExecution, EngineError> = async {
            self.category.ensure_supported(Operation::InitiateNode)?;
            let engine = self.engine()?;
            let node = Self::fetch_node(&engine, context, node_id).await?;
            let child = context.clone_for_child(Level::from_node(runtime_id, &node));
            if node.category == self.category() {
                self.run_node(&child, &node, metadata).await
            } else {
                engine
                    .strategy_for(node.category)
                    .run_node(&child, &node, metadata)
                    .await
            }
        }
        .await;

        match result {
            Ok(execution) => Some(execution),
            Err(error) => {
                self.handle_error(context, error).await;
                None
            }
        }
    }

    async fn run_node(
        &self,
        context: &ExecutionContext,
        node: &Node,
        metadata: InitiateMetadata,
    ) -> Result<NodeExecution, EngineError> {
        self.category.ensure_supported(Operation::RunNode)?;
        let engine = self.engine()?;
        let runtime_id = Self::runtime_id(context)?;

        // The parent waits on its first child's runtime id; roots notify no one
        let parent_id = context.parent_runtime_id().map(str::to_string);
        let links = ExecutionLinks {
            notify_id: parent_id.as_ref().map(|_| runtime_id.to_string()),
            parent_id,
            previous_id: None,
        };

        let execution = self
            .category
            .create_node_execution(context, node, &metadata, links)?;
        self.persist_and_schedule(&engine, execution, None).await
    }

    async fn run_next_node(
        &self,
        context: &ExecutionContext,
        node: &Node,
        previous: &NodeExecution,
        metadata: InitiateMetadata,
    ) -> Result<NodeExecution, EngineError> {
        self.category.ensure_supported(Operation::RunNextNode)?;
        let engine = self.engine()?;

        let links = ExecutionLinks {
            notify_id: previous.notify_id.clone(),
            parent_id: previous.parent_id.clone(),
            previous_id: Some(previous.uuid.clone()),
        };

        let execution = self
            .category
            .create_node_execution(context, node, &metadata, links)?;
        self.persist_and_schedule(&engine, execution, Some(&previous.uuid))
            .await
    }

    async fn handle_sdk_response_event(&self, event: SdkResponseEvent) {
        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(_) => {
                warn!("Dropping {} event, engine is gone", event.event_type);
                return;
            }
        };

        let Some(processor) = engine.processors().get_handler(&event.event_type) else {
            warn!(
                "No processor registered for {} event on {}",
                event.event_type,
                event.context.describe()
            );
            self.handle_error(&event.context, EngineError::NoProcessor(event.event_type.clone()))
                .await;
            return;
        };

        let context = event.context.clone();
        let event_type = event.event_type.clone();
        if let Err(error) = processor.handle_event(self, event).await {
            warn!("{} event on {} failed: {}", event_type, context.describe(), error);
            self.handle_error(&context, error).await;
        }
    }

    async fn handle_error(&self, context: &ExecutionContext, error: EngineError) {
        error!("Error on {}: {}", context.describe(), error);
        let Ok(engine) = self.engine() else {
            return;
        };
        let Some(runtime_id) = context.current_runtime_id() else {
            engine.complete_plan_run(context.plan_execution_id(), Status::Errored);
            return;
        };

        let status = error.terminal_status();
        let failure = error.to_failure_info();
        let result: Result<(), EngineError> = async {
            let Some(execution) = engine.store().get(runtime_id).await? else {
                warn!("No execution record for {}, nothing to fail", context.describe());
                return Ok(());
            };

            if execution.is_terminal() {
                // Already concluded; make sure its waiter still hears of the failure
                if execution.next_id.is_none() {
                    Self::notify_end(&engine, &execution, status, Some(failure));
                }
                return Ok(());
            }

            let recorded = failure.clone();
            let updated = engine
                .store()
                .update(runtime_id, &move |execution: &mut NodeExecution| {
                    !execution.is_terminal() && execution.apply_status(status) && {
                        execution.failure_info = Some(recorded.clone());
                        true
                    }
                })
                .await?;

            if let Some(execution) = updated {
                if let Some(response) = execution.last_executable_response() {
                    engine.wait_notify().cancel(&response.correlation_ids());
                }
                engine.emit(EngineEvent::NodeConcluded {
                    execution_id: execution.uuid.clone(),
                    identifier: execution.identifier.clone(),
                    category: execution.category,
                    status: execution.status,
                    failure: execution.failure_info.clone(),
                });
                Self::notify_end(&engine, &execution, execution.status, execution.failure_info.clone());
            }
            Ok(())
        }
        .await;

        if let Err(error) = result {
            error!("Could not record failure of {}: {}", context.describe(), error);
        }
    }

    async fn start_execution(&self, context: &ExecutionContext) -> Result<(), EngineError> {
        self.category.ensure_supported(Operation::StartExecution)?;
        let engine = self.engine()?;
        let execution = Self::load(&engine, context).await?;
        if execution.is_terminal() {
            info!("Not starting {}, already {}", context.describe(), execution.status);
            return Ok(());
        }

        let node = Self::fetch_node(&engine, context, &execution.node_id).await?;
        let mode = engine.facilitate(&node)?;
        debug!("Facilitated {} as {}", context.describe(), mode);
        engine.publish(SdkResponseEvent::facilitation(context.clone(), mode))
    }

    async fn process_facilitation_response(
        &self,
        context: &ExecutionContext,
        mode: ExecutionMode,
    ) -> Result<(), EngineError> {
        self.category
            .ensure_supported(Operation::ProcessFacilitationResponse)?;
        let engine = self.engine()?;
        let runtime_id = Self::runtime_id(context)?;

        let updated = engine
            .store()
            .update(runtime_id, &move |execution: &mut NodeExecution| {
                execution.status == Status::Queued && {
                    execution.mode = Some(mode);
                    execution.apply_status(Status::Running)
                }
            })
            .await?;
        let Some(execution) = updated else {
            warn!("{} is no longer queued, ignoring facilitation", context.describe());
            return Ok(());
        };

        info!("Started {} '{}' as {}", execution.category, execution.identifier, mode);
        engine.emit(EngineEvent::NodeStarted {
            execution_id: execution.uuid.clone(),
            identifier: execution.identifier.clone(),
            category: execution.category,
            mode,
        });

        match mode {
            ExecutionMode::Sync | ExecutionMode::Task | ExecutionMode::TaskChain => {
                engine
                    .submit(Job::InvokeExecutable {
                        context: context.clone(),
                        mode,
                    })
                    .await
            }
            ExecutionMode::Child | ExecutionMode::Children => {
                let node = Self::fetch_node(&engine, context, &execution.node_id).await?;
                if node.child_node_ids.is_empty() {
                    debug!("{} has no children", context.describe());
                    return self
                        .conclude_and_advise(&engine, context, Status::Succeeded, &[Status::Running], None)
                        .await;
                }
                let response = if mode == ExecutionMode::Child {
                    ExecutableResponse::Child {
                        child_id: new_runtime_id(),
                    }
                } else {
                    ExecutableResponse::Children {
                        child_ids: node.child_node_ids.iter().map(|_| new_runtime_id()).collect(),
                    }
                };
                self.process_start_event_response(context, response).await
            }
        }
    }

    async fn process_start_event_response(
        &self,
        context: &ExecutionContext,
        response: ExecutableResponse,
    ) -> Result<(), EngineError> {
        self.category
            .ensure_supported(Operation::ProcessStartEventResponse)?;
        let engine = self.engine()?;
        let runtime_id = Self::runtime_id(context)?;

        let waiting = match &response {
            ExecutableResponse::Task { .. } | ExecutableResponse::TaskChain { .. } => Status::TaskWaiting,
            ExecutableResponse::Child { .. } | ExecutableResponse::Children { .. } => Status::AsyncWaiting,
        };
        let correlation_ids = response.correlation_ids();
        if correlation_ids.is_empty() {
            return Err(EngineError::InvalidEvent(format!(
                "{} dispatched nothing to wait on",
                context.describe()
            )));
        }

        let recorded = response.clone();
        let updated = engine
            .store()
            .update(runtime_id, &move |execution: &mut NodeExecution| {
                execution.status == Status::Running && {
                    execution.executable_responses.push(recorded.clone());
                    execution.apply_status(waiting)
                }
            })
            .await?;
        let Some(execution) = updated else {
            warn!("{} is not running, ignoring start event", context.describe());
            return Ok(());
        };

        let resume_engine = self.engine.clone();
        let resume_context = context.clone();
        engine
            .wait_notify()
            .wait_for_all(correlation_ids, move |responses| {
                let Some(engine) = resume_engine.upgrade() else {
                    return;
                };
                if let Err(error) = engine.publish(SdkResponseEvent::resume(resume_context, responses, None)) {
                    warn!("Could not resume node: {}", error);
                }
            });

        let children: Vec<(String, String)> = match response {
            ExecutableResponse::Child { child_id } => {
                let node = Self::fetch_node(&engine, context, &execution.node_id).await?;
                node.child_node_ids
                    .first()
                    .map(|node_id| (node_id.clone(), child_id))
                    .into_iter()
                    .collect()
            }
            ExecutableResponse::Children { child_ids } => {
                let node = Self::fetch_node(&engine, context, &execution.node_id).await?;
                node.child_node_ids.into_iter().zip(child_ids).collect()
            }
            _ => Vec::new(),
        };
        for (node_id, child_runtime_id) in children {
            let initiated = self
                .initiate_node(context, &node_id, &child_runtime_id, InitiateMetadata::default())
                .await;
            if initiated.is_none() {
                warn!("Stopped starting children of {}", context.describe());
                break;
            }
        }
        Ok(())
    }

    async fn resume_node_execution(
        &self,
        context: &ExecutionContext,
        responses: Responses,
        async_error: Option<String>,
    ) -> Result<(), EngineError> {
        self.category
            .ensure_supported(Operation::ResumeNodeExecution)?;
        let engine = self.engine()?;
        let runtime_id = Self::runtime_id(context)?;
        let execution = Self::load(&engine, context).await?;

        if execution.is_terminal() {
            info!(
                "Dropping late response for {}, already {}",
                context.describe(),
                execution.status
            );
            return Ok(());
        }

        if let Some(message) = async_error {
            let failure = FailureInfo::new(FailureKind::Dispatch, message);
            return self
                .conclude_and_advise(&engine, context, Status::Failed, Status::active(), Some(failure))
                .await;
        }

        match execution.mode {
            Some(ExecutionMode::Task | ExecutionMode::TaskChain) => {
                let resumed = engine
                    .store()
                    .update_status(runtime_id, Status::Running, &[Status::TaskWaiting])
                    .await?;
                if resumed.is_none() {
                    warn!("{} was not waiting on a task", context.describe());
                    return Ok(());
                }
                engine
                    .submit(Job::ResumeExecutable {
                        context: context.clone(),
                        responses,
                    })
                    .await
            }
            Some(ExecutionMode::Child | ExecutionMode::Children) => {
                let order: Vec<String> = match execution.last_executable_response() {
                    Some(ExecutableResponse::Child { child_id }) => vec![child_id.clone()],
                    Some(ExecutableResponse::Children { child_ids }) => child_ids.clone(),
                    _ => {
                        return Err(EngineError::InvalidEvent(format!(
                            "{} resumed without children",
                            context.describe()
                        )))
                    }
                };

                let child_statuses: Vec<(String, Status)> = responses
                    .values()
                    .filter_map(|data| match data {
                        ResponseData::Child {
                            execution_id,
                            status,
                            ..
                        } => Some((execution_id.clone(), *status)),
                        _ => None,
                    })
                    .collect();
                engine
                    .store()
                    .update(runtime_id, &move |execution: &mut NodeExecution| {
                        execution.child_statuses.extend(child_statuses.iter().cloned());
                        true
                    })
                    .await?;

                let (status, failure) = Self::aggregate(&order, &responses);
                self.conclude_and_advise(&engine, context, status, &[Status::AsyncWaiting], failure)
                    .await
            }
            other => Err(EngineError::InvalidEvent(format!(
                "{} cannot be resumed in mode {:?}",
                context.describe(),
                other
            ))),
        }
    }

    async fn process_step_response(
        &self,
        context: &ExecutionContext,
        response: StepResponse,
    ) -> Result<(), EngineError> {
        self.category
            .ensure_supported(Operation::ProcessStepResponse)?;
        let engine = self.engine()?;
        let runtime_id = Self::runtime_id(context)?;

        if !response.status.is_terminal() {
            return Err(EngineError::InvalidEvent(format!(
                "step response carried non-terminal status {}",
                response.status
            )));
        }

        let outcomes = response.outcomes;
        let recorded = engine
            .store()
            .update(runtime_id, &move |execution: &mut NodeExecution| {
                execution.status == Status::Running && {
                    execution.outcomes = outcomes.clone();
                    true
                }
            })
            .await?;
        if recorded.is_none() {
            info!("Dropping step response for {}, no longer running", context.describe());
            return Ok(());
        }

        self.conclude_and_advise(
            &engine,
            context,
            response.status,
            &[Status::Running],
            response.failure_info,
        )
        .await
    }

    async fn conclude_execution(
        &self,
        context: &ExecutionContext,
        to: Status,
        from: &[Status],
        failure_info: Option<FailureInfo>,
    ) -> Result<Option<NodeExecution>, EngineError> {
        self.category
            .ensure_supported(Operation::ConcludeExecution)?;
        let engine = self.engine()?;
        let runtime_id = Self::runtime_id(context)?;

        if !to.is_terminal() {
            return Err(EngineError::InvalidEvent(format!(
                "cannot conclude with non-terminal status {}",
                to
            )));
        }

        let from = from.to_vec();
        let updated = engine
            .store()
            .update(runtime_id, &move |execution: &mut NodeExecution| {
                from.contains(&execution.status) && execution.apply_status(to) && {
                    if failure_info.is_some() {
                        execution.failure_info = failure_info.clone();
                    }
                    true
                }
            })
            .await?;

        match &updated {
            Some(execution) => {
                info!(
                    "{} '{}' concluded {}",
                    execution.category, execution.identifier, execution.status
                );
                engine.emit(EngineEvent::NodeConcluded {
                    execution_id: execution.uuid.clone(),
                    identifier: execution.identifier.clone(),
                    category: execution.category,
                    status: execution.status,
                    failure: execution.failure_info.clone(),
                });
            }
            None => debug!("{} not concluded as {}, status moved on", context.describe(), to),
        }
        Ok(updated)
    }

    async fn process_adviser_response(
        &self,
        context: &ExecutionContext,
        response: AdviserResponse,
    ) -> Result<(), EngineError> {
        self.category
            .ensure_supported(Operation::ProcessAdviserResponse)?;
        let engine = self.engine()?;
        let execution = Self::load(&engine, context).await?;

        if let Some(parent_id) = &execution.parent_id {
            let parent_ended = engine
                .store()
                .get(parent_id)
                .await?
                .is_some_and(|parent| parent.is_terminal());
            if parent_ended {
                info!("Parent of {} has ended, not acting on advice", context.describe());
                return Ok(());
            }
        }

        match response {
            AdviserResponse::NextStep { next_node_id } => {
                let node = Self::fetch_node(&engine, context, &next_node_id).await?;
                let sibling = context.clone_for_sibling(Level::from_node(new_runtime_id(), &node));
                engine
                    .strategy_for(node.category)
                    .run_next_node(&sibling, &node, &execution, InitiateMetadata::default())
                    .await?;
            }
            AdviserResponse::Retry { retry_index } => {
                let node = Self::fetch_node(&engine, context, &execution.node_id).await?;
                info!(
                    "Retrying '{}' (attempt {} after {})",
                    node.identifier,
                    retry_index + 1,
                    execution.status
                );
                let retry = context.clone_for_sibling(Level::from_node(new_runtime_id(), &node));
                self.run_next_node(&retry, &node, &execution, InitiateMetadata::retry(retry_index))
                    .await?;
            }
            AdviserResponse::IgnoreFailure => {
                let overridden = self
                    .conclude_execution(
                        context,
                        Status::IgnoreFailed,
                        &[Status::Failed, Status::Errored],
                        None,
                    )
                    .await?;
                if let Some(execution) = overridden {
                    self.advise(&engine, context, &execution).await?;
                }
            }
        }
        Ok(())
    }

    async fn end_node_execution(&self, context: &ExecutionContext) -> Result<(), EngineError> {
        self.category
            .ensure_supported(Operation::EndNodeExecution)?;
        let engine = self.engine()?;
        let execution = Self::load(&engine, context).await?;
        if !execution.is_terminal() {
            return Err(EngineError::IllegalTransition {
                execution_id: execution.uuid.clone(),
                from: execution.status,
                to: execution.status,
            });
        }
        Self::notify_end(&engine, &execution, execution.status, execution.failure_info.clone());
        Ok(())
    }
}
