//! Orchestration engine - wires strategies, workers and events together
//!
//! The engine owns the collaborators every node strategy works against: plan
//! definitions, the execution store, registered steps, the remote task
//! executor and the event processors. It is also the driver the strategies
//! hand scheduled work to: worker jobs start nodes and invoke step
//! executables, and the results come back as SDK response events.

use crate::core::config::EngineConfig;
use crate::core::{
    ExecutableResponse, ExecutionContext, ExecutionMode, ExecutionSetup, FailureInfo, FailureKind,
    InitiateMetadata, Node, NodeCategory, NodeExecution, Principal, Status,
};
use crate::execution::category::{ForkCategory, PlanCategory, StageCategory, StepCategory};
use crate::execution::dispatch::{SdkResponseEvent, SdkResponseProcessorRegistry};
use crate::execution::error::EngineError;
use crate::execution::event_bus::{EventBus, EventSink};
use crate::execution::strategy::{NodeExecutionStrategy, NodeStrategy};
use crate::execution::task::{LocalTaskExecutor, TaskExecutor, TaskResultReporter, TaskResultSink};
use crate::execution::wait_notify::{Responses, WaitNotifyEngine};
use crate::execution::worker_pool::{Job, JobHandler, WorkerPool};
use crate::persistence::{InMemoryNodeExecutionStore, NodeExecutionStore, PlanService};
use crate::security::StaticAccessControl;
use crate::step::{
    Executable, ResponseData, ResponseHandle, StepError, StepInputPackage, StepParameters,
    StepRegistry, StepResponse, TaskChainExecutableWithRbac, TaskChainResponse, TaskResult,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle events observable from outside the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PlanStarted {
        plan_execution_id: String,
        plan_id: String,
    },
    NodeQueued {
        execution_id: String,
        identifier: String,
        category: NodeCategory,
        retry_index: u32,
    },
    NodeStarted {
        execution_id: String,
        identifier: String,
        category: NodeCategory,
        mode: ExecutionMode,
    },
    NodeConcluded {
        execution_id: String,
        identifier: String,
        category: NodeCategory,
        status: Status,
        failure: Option<FailureInfo>,
    },
    PlanCompleted {
        plan_execution_id: String,
        status: Status,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Handle on a running plan
#[derive(Debug)]
pub struct PlanRun {
    pub plan_execution_id: String,
    pub root_runtime_id: String,
    receiver: watch::Receiver<Option<Status>>,
}

impl PlanRun {
    /// Terminal status of the run, if it has completed
    pub fn status(&self) -> Option<Status> {
        *self.receiver.borrow()
    }

    /// Wait for the root node to end
    pub async fn wait(mut self) -> Result<Status, EngineError> {
        let status = self
            .receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::EngineShutDown)?;
        (*status).ok_or(EngineError::EngineShutDown)
    }
}

struct Strategies {
    plan: Arc<dyn NodeStrategy>,
    stage: Arc<dyn NodeStrategy>,
    step: Arc<dyn NodeStrategy>,
    fork: Arc<dyn NodeStrategy>,
}

impl Strategies {
    fn new(engine: &Weak<OrchestrationEngine>) -> Self {
        Self {
            plan: Arc::new(NodeExecutionStrategy::new(PlanCategory, engine.clone())),
            stage: Arc::new(NodeExecutionStrategy::new(StageCategory, engine.clone())),
            step: Arc::new(NodeExecutionStrategy::new(StepCategory, engine.clone())),
            fork: Arc::new(NodeExecutionStrategy::new(ForkCategory, engine.clone())),
        }
    }

    fn get(&self, category: NodeCategory) -> &Arc<dyn NodeStrategy> {
        match category {
            NodeCategory::Plan => &self.plan,
            NodeCategory::Stage => &self.stage,
            NodeCategory::Step => &self.step,
            NodeCategory::Fork => &self.fork,
        }
    }
}

/// Builder for [`OrchestrationEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    plan_service: Arc<dyn PlanService>,
    store: Option<Arc<dyn NodeExecutionStore>>,
    steps: Option<StepRegistry>,
    task_executor: Option<Arc<dyn TaskExecutor>>,
    processors: Option<SdkResponseProcessorRegistry>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn NodeExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn steps(mut self, steps: StepRegistry) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn task_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.task_executor = Some(executor);
        self
    }

    pub fn processors(mut self, processors: SdkResponseProcessorRegistry) -> Self {
        self.processors = Some(processors);
        self
    }

    /// Build the engine and start its workers and event consumers
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Arc<OrchestrationEngine> {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryNodeExecutionStore::new()));
        let steps = self.steps.unwrap_or_else(|| {
            let acl = StaticAccessControl::new()
                .grant(&config.principal, config.granted_permissions.iter().cloned());
            StepRegistry::with_builtins(Arc::new(acl))
        });
        let task_executor = self
            .task_executor
            .unwrap_or_else(|| Arc::new(LocalTaskExecutor::new(config.task_timeout_secs)));
        let processors = self
            .processors
            .unwrap_or_else(SdkResponseProcessorRegistry::with_builtins);

        Arc::new_cyclic(|engine: &Weak<OrchestrationEngine>| {
            let job_handler: Weak<dyn JobHandler> = engine.clone();
            let event_sink: Weak<dyn EventSink> = engine.clone();
            OrchestrationEngine {
                workers: WorkerPool::new(config.workers, config.queue_capacity, job_handler),
                events: EventBus::new(config.event_shards, event_sink),
                strategies: Strategies::new(engine),
                plan_service: self.plan_service,
                store,
                steps,
                task_executor,
                processors,
                wait_notify: WaitNotifyEngine::with_retention(Duration::from_secs(
                    config.notification_retention_secs,
                )),
                runs: Mutex::new(HashMap::new()),
                handlers: RwLock::new(Vec::new()),
                self_ref: engine.clone(),
                config,
            }
        })
    }
}

/// Main node orchestration engine
pub struct OrchestrationEngine {
    config: EngineConfig,
    plan_service: Arc<dyn PlanService>,
    store: Arc<dyn NodeExecutionStore>,
    steps: StepRegistry,
    task_executor: Arc<dyn TaskExecutor>,
    processors: SdkResponseProcessorRegistry,
    wait_notify: WaitNotifyEngine,
    strategies: Strategies,
    workers: WorkerPool,
    events: EventBus,
    runs: Mutex<HashMap<String, watch::Sender<Option<Status>>>>,
    handlers: RwLock<Vec<EventHandler>>,
    self_ref: Weak<OrchestrationEngine>,
}

impl OrchestrationEngine {
    pub fn builder(plan_service: Arc<dyn PlanService>) -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            plan_service,
            store: None,
            steps: None,
            task_executor: None,
            processors: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plan_service(&self) -> &Arc<dyn PlanService> {
        &self.plan_service
    }

    pub fn store(&self) -> &Arc<dyn NodeExecutionStore> {
        &self.store
    }

    pub fn processors(&self) -> &SdkResponseProcessorRegistry {
        &self.processors
    }

    pub fn wait_notify(&self) -> &WaitNotifyEngine {
        &self.wait_notify
    }

    pub fn strategy_for(&self, category: NodeCategory) -> Arc<dyn NodeStrategy> {
        Arc::clone(self.strategies.get(category))
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: EngineEvent) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Setup for a new run of `plan_id`, scoped and attributed per the config
    pub fn new_setup(&self, plan_id: impl Into<String>) -> ExecutionSetup {
        let mut setup = ExecutionSetup::new(self.config.account_id.clone(), plan_id)
            .with_principal(Principal::new(self.config.principal.clone()));
        setup.org_id = self.config.org_id.clone();
        setup.project_id = self.config.project_id.clone();
        setup
    }

    pub async fn submit(&self, job: Job) -> Result<(), EngineError> {
        self.workers.submit(job).await
    }

    pub fn publish(&self, event: SdkResponseEvent) -> Result<(), EngineError> {
        self.events.publish(event)
    }

    /// Start the plan named by `setup` and return a handle on the run
    pub async fn run_plan(&self, setup: ExecutionSetup) -> Result<PlanRun, EngineError> {
        let plan = self
            .plan_service
            .fetch_plan(&setup.plan_id)
            .await?
            .ok_or_else(|| EngineError::PlanNotFound(setup.plan_id.clone()))?;

        let plan_execution_id = setup.plan_execution_id.clone();
        let root_runtime_id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = watch::channel(None);
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(plan_execution_id.clone(), sender);

        info!("Starting plan '{}' ({})", plan.name, plan_execution_id);
        self.emit(EngineEvent::PlanStarted {
            plan_execution_id: plan_execution_id.clone(),
            plan_id: plan.plan_id.clone(),
        });

        let context = ExecutionContext::new(setup);
        self.initiate_node(
            &context,
            &plan.root_node_id,
            &root_runtime_id,
            InitiateMetadata::default(),
        )
        .await;

        Ok(PlanRun {
            plan_execution_id,
            root_runtime_id,
            receiver,
        })
    }

    /// Initiate `node_id` under `context` through the parent's strategy
    pub async fn initiate_node(
        &self,
        context: &ExecutionContext,
        node_id: &str,
        runtime_id: &str,
        metadata: InitiateMetadata,
    ) -> Option<NodeExecution> {
        let category = context.current_category().unwrap_or(NodeCategory::Plan);
        self.strategy_for(category)
            .initiate_node(context, node_id, runtime_id, metadata)
            .await
    }

    /// Start a persisted node execution
    pub async fn start_node_execution(&self, context: &ExecutionContext) -> Result<(), EngineError> {
        let category = context.current_category().ok_or(EngineError::EmptyContext)?;
        self.strategy_for(category).start_execution(context).await
    }

    /// Deliver the result of a remote task
    pub fn notify_task_result(&self, task_id: &str, result: TaskResult) {
        debug!("Result for task {} arrived", task_id);
        self.wait_notify.notify(task_id, ResponseData::Task(result));
    }

    /// Abort every unfinished node execution of a plan run
    ///
    /// Returns how many executions were aborted.
    pub async fn abort_plan(&self, plan_execution_id: &str) -> Result<usize, EngineError> {
        let executions = self.store.list_by_plan_execution(plan_execution_id).await?;
        let mut aborted = 0;
        for execution in executions.iter().filter(|e| !e.is_terminal()) {
            let updated = self
                .store
                .update_status(&execution.uuid, Status::Aborted, Status::active())
                .await?;
            if let Some(execution) = updated {
                aborted += 1;
                if let Some(response) = execution.last_executable_response() {
                    self.wait_notify.cancel(&response.correlation_ids());
                }
                self.emit(EngineEvent::NodeConcluded {
                    execution_id: execution.uuid.clone(),
                    identifier: execution.identifier.clone(),
                    category: execution.category,
                    status: Status::Aborted,
                    failure: None,
                });
            }
        }
        warn!("Aborted {} node executions of {}", aborted, plan_execution_id);
        self.complete_plan_run(plan_execution_id, Status::Aborted);
        Ok(aborted)
    }

    /// Resolve a plan run; only the first completion counts
    pub fn complete_plan_run(&self, plan_execution_id: &str, status: Status) {
        let sender = self
            .runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(plan_execution_id);
        match sender {
            Some(sender) => {
                info!("Plan run {} finished: {}", plan_execution_id, status);
                sender.send_replace(Some(status));
                self.emit(EngineEvent::PlanCompleted {
                    plan_execution_id: plan_execution_id.to_string(),
                    status,
                });
            }
            None => debug!("Plan run {} already completed", plan_execution_id),
        }
    }

    /// Decide how `node` executes
    pub fn facilitate(&self, node: &Node) -> Result<ExecutionMode, EngineError> {
        match node.category {
            NodeCategory::Step => self
                .steps
                .get(&node.step_type)
                .map(|executable| executable.mode())
                .ok_or_else(|| EngineError::UnknownStepType(node.step_type.to_string())),
            NodeCategory::Plan | NodeCategory::Stage => Ok(ExecutionMode::Child),
            NodeCategory::Fork => Ok(ExecutionMode::Children),
        }
    }

    fn reporter(&self) -> TaskResultReporter {
        let sink: Weak<dyn TaskResultSink> = self.self_ref.clone();
        TaskResultReporter::new(sink)
    }

    async fn load_running(
        &self,
        context: &ExecutionContext,
    ) -> Result<Option<(NodeExecution, Node, Executable)>, EngineError> {
        let runtime_id = context.current_runtime_id().ok_or(EngineError::EmptyContext)?;
        let execution = self
            .store
            .get(runtime_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(runtime_id.to_string()))?;
        if execution.status != Status::Running {
            info!(
                "Skipping step call for {}, it is {}",
                context.describe(),
                execution.status
            );
            return Ok(None);
        }

        let node = self
            .plan_service
            .fetch_node(context.plan_id(), &execution.node_id)
            .await?
            .ok_or_else(|| EngineError::NodeNotFound {
                plan_id: context.plan_id().to_string(),
                node_id: execution.node_id.clone(),
            })?;
        let executable = self
            .steps
            .get(&node.step_type)
            .ok_or_else(|| EngineError::UnknownStepType(node.step_type.to_string()))?;
        Ok(Some((execution, node, executable)))
    }

    /// Outcomes of the sibling that ran before `execution`, skipping earlier
    /// attempts of the same node
    async fn resolve_inputs(&self, execution: &NodeExecution) -> Result<StepInputPackage, EngineError> {
        let mut seen = HashSet::new();
        let mut previous_id = execution.previous_id.clone();
        while let Some(id) = previous_id {
            if !seen.insert(id.clone()) {
                break;
            }
            let Some(previous) = self.store.get(&id).await? else {
                break;
            };
            if previous.node_id != execution.node_id {
                return Ok(StepInputPackage {
                    previous: previous.outcomes,
                });
            }
            previous_id = previous.previous_id;
        }
        Ok(StepInputPackage::default())
    }

    /// Run the step executable of a node that facilitation just started
    async fn invoke_executable(
        &self,
        context: &ExecutionContext,
        mode: ExecutionMode,
    ) -> Result<(), EngineError> {
        let Some((execution, node, executable)) = self.load_running(context).await? else {
            return Ok(());
        };
        if executable.mode() != mode {
            return Err(EngineError::InvalidEvent(format!(
                "{} was facilitated as {} but its step runs as {}",
                context.describe(),
                mode,
                executable.mode()
            )));
        }

        let params = StepParameters::new(node.step_parameters.clone());
        let inputs = self.resolve_inputs(&execution).await?;

        match executable {
            Executable::Sync(step) => {
                let response = step
                    .execute_sync(context, &params, &inputs, None)
                    .await
                    .unwrap_or_else(StepResponse::from);
                self.publish(SdkResponseEvent::step_response(context.clone(), response))
            }
            Executable::Task(step) => match step.obtain_task(context, &params, &inputs).await {
                Ok(request) => {
                    let task_id = self
                        .task_executor
                        .queue_task(context, request, self.reporter())
                        .await?;
                    self.publish(SdkResponseEvent::start_event(
                        context.clone(),
                        ExecutableResponse::Task { task_id },
                    ))
                }
                Err(e) => self.fail_step(context, e),
            },
            Executable::TaskChain(step) => {
                match step.start_chain_link(context, &params, &inputs).await {
                    Ok(link) => self.dispatch_chain_link(context, &step, &params, link).await,
                    Err(e) => self.fail_step(context, e),
                }
            }
        }
    }

    /// Dispatch the task of a chain link, or finalize when the chain ended
    /// without one
    async fn dispatch_chain_link(
        &self,
        context: &ExecutionContext,
        step: &Arc<dyn TaskChainExecutableWithRbac>,
        params: &StepParameters,
        link: TaskChainResponse,
    ) -> Result<(), EngineError> {
        match link.task_request {
            Some(request) => {
                let task_id = self
                    .task_executor
                    .queue_task(context, request, self.reporter())
                    .await?;
                self.publish(SdkResponseEvent::start_event(
                    context.clone(),
                    ExecutableResponse::TaskChain {
                        task_id: Some(task_id),
                        chain_end: link.chain_end,
                        pass_through: link.pass_through,
                    },
                ))
            }
            None if link.chain_end => {
                let response = step
                    .finalize_execution(context, params, link.pass_through, ResponseHandle::empty())
                    .await
                    .unwrap_or_else(StepResponse::from);
                self.publish(SdkResponseEvent::step_response(context.clone(), response))
            }
            None => self.fail_step(
                context,
                StepError::UnexpectedResponse(
                    "chain link neither dispatched a task nor ended the chain".to_string(),
                ),
            ),
        }
    }

    /// Hand task results to the step executable of a resumed node
    async fn resume_executable(
        &self,
        context: &ExecutionContext,
        mut responses: Responses,
    ) -> Result<(), EngineError> {
        let Some((execution, node, executable)) = self.load_running(context).await? else {
            return Ok(());
        };
        let params = StepParameters::new(node.step_parameters.clone());
        let mut handle_for = |task_id: &str| match responses.remove(task_id) {
            Some(data) => ResponseHandle::ready(data),
            None => ResponseHandle::empty(),
        };

        match (executable, execution.last_executable_response()) {
            (Executable::Task(step), Some(ExecutableResponse::Task { task_id })) => {
                let response = step
                    .handle_task_result(context, &params, handle_for(task_id.as_str()))
                    .await
                    .unwrap_or_else(StepResponse::from);
                self.publish(SdkResponseEvent::step_response(context.clone(), response))
            }
            (
                Executable::TaskChain(step),
                Some(ExecutableResponse::TaskChain {
                    task_id: Some(task_id),
                    chain_end,
                    pass_through,
                }),
            ) => {
                let handle = handle_for(task_id.as_str());
                if *chain_end {
                    let response = step
                        .finalize_execution(context, &params, pass_through.clone(), handle)
                        .await
                        .unwrap_or_else(StepResponse::from);
                    return self.publish(SdkResponseEvent::step_response(context.clone(), response));
                }

                let inputs = self.resolve_inputs(&execution).await?;
                match step
                    .execute_next_link(context, &params, &inputs, pass_through.clone(), handle)
                    .await
                {
                    Ok(link) => self.dispatch_chain_link(context, &step, &params, link).await,
                    Err(e) => self.fail_step(context, e),
                }
            }
            (executable, last) => Err(EngineError::InvalidEvent(format!(
                "cannot resume {:?} step of {} waiting on {:?}",
                executable.mode(),
                context.describe(),
                last
            ))),
        }
    }

    fn fail_step(&self, context: &ExecutionContext, error: StepError) -> Result<(), EngineError> {
        warn!("Step of {} failed: {}", context.describe(), error);
        self.publish(SdkResponseEvent::step_response(
            context.clone(),
            StepResponse::from(error),
        ))
    }

    async fn run_job(&self, job: Job) -> Result<(), EngineError> {
        match job {
            Job::StartNode { context } => self.start_node_execution(&context).await,
            Job::InvokeExecutable { context, mode } => self.invoke_executable(&context, mode).await,
            Job::ResumeExecutable { context, responses } => {
                self.resume_executable(&context, responses).await
            }
        }
    }
}

#[async_trait]
impl JobHandler for OrchestrationEngine {
    async fn handle_job(&self, job: Job) {
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };
        let context = job.context().clone();

        // A panicking step must not take the worker down with it
        let outcome = tokio::spawn(async move { engine.run_job(job).await }).await;
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_failure_info(),
            Err(join_error) => FailureInfo::new(
                FailureKind::Application,
                format!("job panicked: {}", join_error),
            ),
        };

        warn!("Job for {} failed: {}", context.describe(), failure.message);
        if let Err(e) = self.publish(SdkResponseEvent::error(context, failure)) {
            error!("Could not report job failure: {}", e);
        }
    }
}

#[async_trait]
impl EventSink for OrchestrationEngine {
    async fn consume(&self, event: SdkResponseEvent) {
        let category = event.context.current_category().unwrap_or(NodeCategory::Plan);
        let strategy = self.strategy_for(category);
        let context = event.context.clone();

        let handler = Arc::clone(&strategy);
        let outcome = tokio::spawn(async move { handler.handle_sdk_response_event(event).await }).await;
        if let Err(join_error) = outcome {
            error!("Event handling for {} panicked: {}", context.describe(), join_error);
            let failure = FailureInfo::new(
                FailureKind::Dispatch,
                format!("event handling panicked: {}", join_error),
            );
            strategy
                .handle_error(&context, EngineError::Reported(failure))
                .await;
        }
    }
}

impl TaskResultSink for OrchestrationEngine {
    fn notify_task_result(&self, task_id: &str, result: TaskResult) {
        OrchestrationEngine::notify_task_result(self, task_id, result);
    }
}
