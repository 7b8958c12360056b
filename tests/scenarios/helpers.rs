//! Shared fixtures for scenario tests: recording steps, a scriptable task
//! executor and plan builders

use async_trait::async_trait;
use node_engine::core::config::EngineConfig;
use node_engine::core::{
    AdviserObtainment, ExecutionContext, FailureKind, Node, NodeCategory, NodeExecution, Plan,
    Status, StepType,
};
use node_engine::execution::{
    EngineError, OrchestrationEngine, PlanRun, TaskExecutor, TaskResultReporter,
};
use node_engine::persistence::InMemoryPlanService;
use node_engine::security::{active_scope_depth, PIPELINE_EXECUTE};
use node_engine::step::{
    Executable, PassThroughData, ResponseHandle, StepError, StepInputPackage, StepParameters,
    StepRegistry, StepResponse, SyncExecutableWithRbac, TaskChainExecutableWithRbac,
    TaskChainResponse, TaskExecutableWithRbac, TaskRequest, TaskResult,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SYNC_STEP: &str = "RecordingSync";
pub const TASK_STEP: &str = "RecordingTask";
pub const CHAIN_STEP: &str = "RecordingChain";

fn denied() -> StepError {
    StepError::AccessDenied {
        principal: "tester".to_string(),
        permission: PIPELINE_EXECUTE.to_string(),
        resource: "PIPELINE".to_string(),
    }
}

/// Synchronous step that fails its first `fail_first` invocations
#[derive(Default)]
pub struct RecordingSyncStep {
    pub deny: bool,
    pub fail_first: usize,
    pub validations: AtomicUsize,
    pub executions: AtomicUsize,
}

impl RecordingSyncStep {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SyncExecutableWithRbac for RecordingSyncStep {
    async fn validate_resources(
        &self,
        _context: &ExecutionContext,
        _params: &StepParameters,
    ) -> Result<(), StepError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(denied());
        }
        Ok(())
    }

    async fn execute_sync_after_rbac(
        &self,
        _context: &ExecutionContext,
        params: &StepParameters,
        _inputs: &StepInputPackage,
        _pass_through: Option<PassThroughData>,
    ) -> Result<StepResponse, StepError> {
        let attempt = self.executions.fetch_add(1, Ordering::SeqCst);
        if params.as_value().get("fail").and_then(Value::as_bool) == Some(true)
            || attempt < self.fail_first
        {
            return Ok(StepResponse::failed(
                FailureKind::Application,
                format!("attempt {} failed", attempt),
            ));
        }
        Ok(StepResponse::succeeded().with_outcome("attempt", json!(attempt)))
    }
}

/// Task step whose outcome is whatever the task returned
#[derive(Default)]
pub struct RecordingTaskStep {
    pub validations: AtomicUsize,
    pub obtained: AtomicUsize,
    pub handled: AtomicUsize,
}

#[async_trait]
impl TaskExecutableWithRbac for RecordingTaskStep {
    async fn validate_resources(
        &self,
        _context: &ExecutionContext,
        _params: &StepParameters,
    ) -> Result<(), StepError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn obtain_task_after_rbac(
        &self,
        _context: &ExecutionContext,
        params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> Result<TaskRequest, StepError> {
        self.obtained.fetch_add(1, Ordering::SeqCst);
        Ok(TaskRequest::new("mock", params.as_value().clone()))
    }

    async fn handle_task_result_with_security_context(
        &self,
        _context: &ExecutionContext,
        _params: &StepParameters,
        response: ResponseHandle,
    ) -> Result<StepResponse, StepError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        let output = response.task_output().await?;
        Ok(StepResponse::succeeded().with_outcome("output", output))
    }
}

/// Chain of `links` tasks; the pass-through counts links started so far
pub struct RecordingChainStep {
    pub links: u64,
    pub validations: AtomicUsize,
    pub starts: AtomicUsize,
    pub next_links: AtomicUsize,
    pub finalizations: AtomicUsize,
    /// Pass-through value each call received, in call order
    pub seen: Mutex<Vec<Value>>,
    /// Security scope depth observed inside each call
    pub depths: Mutex<Vec<usize>>,
    pub last_context: Mutex<Option<ExecutionContext>>,
}

impl RecordingChainStep {
    pub fn new(links: u64) -> Self {
        Self {
            links,
            validations: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            next_links: AtomicUsize::new(0),
            finalizations: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            depths: Mutex::new(Vec::new()),
            last_context: Mutex::new(None),
        }
    }

    fn observe(&self, context: &ExecutionContext, pass_through: Option<&PassThroughData>) {
        self.depths.lock().unwrap().push(active_scope_depth(context));
        if let Some(data) = pass_through {
            self.seen.lock().unwrap().push(data.0.clone());
        }
        *self.last_context.lock().unwrap() = Some(context.clone());
    }

    fn link(&self, done: u64) -> TaskChainResponse {
        let request = TaskRequest::new("mock", json!({ "link": done }));
        let pass_through = PassThroughData::new(json!({ "done": done }));
        if done >= self.links {
            TaskChainResponse::last(request, pass_through)
        } else {
            TaskChainResponse::next(request, pass_through)
        }
    }
}

#[async_trait]
impl TaskChainExecutableWithRbac for RecordingChainStep {
    async fn validate_resources(
        &self,
        context: &ExecutionContext,
        _params: &StepParameters,
    ) -> Result<(), StepError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        self.observe(context, None);
        Ok(())
    }

    async fn start_chain_link_after_rbac(
        &self,
        context: &ExecutionContext,
        _params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> Result<TaskChainResponse, StepError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.observe(context, None);
        Ok(self.link(1))
    }

    async fn execute_next_link_with_security_context(
        &self,
        context: &ExecutionContext,
        _params: &StepParameters,
        _inputs: &StepInputPackage,
        pass_through: PassThroughData,
        response: ResponseHandle,
    ) -> Result<TaskChainResponse, StepError> {
        self.next_links.fetch_add(1, Ordering::SeqCst);
        self.observe(context, Some(&pass_through));
        response.task_output().await?;
        let done = pass_through.0["done"].as_u64().unwrap_or(0);
        Ok(self.link(done + 1))
    }

    async fn finalize_execution_with_security_context(
        &self,
        context: &ExecutionContext,
        _params: &StepParameters,
        pass_through: PassThroughData,
        response: ResponseHandle,
    ) -> Result<StepResponse, StepError> {
        self.finalizations.fetch_add(1, Ordering::SeqCst);
        self.observe(context, Some(&pass_through));
        let output = response.task_output().await?;
        Ok(StepResponse::succeeded()
            .with_outcome("links", pass_through.0["done"].clone())
            .with_outcome("last", output))
    }
}

/// How [`ScriptedTaskExecutor`] answers queued tasks
#[derive(Debug, Clone)]
pub enum Reply {
    /// Report before `queue_task` returns
    Immediately(TaskResult),
    /// Report from a background task after a short delay
    After(Duration, TaskResult),
    /// Never report; the test delivers results itself
    Hold,
}

pub struct ScriptedTaskExecutor {
    reply: Reply,
    counter: AtomicUsize,
    pub queued: Mutex<Vec<(String, TaskRequest)>>,
}

impl ScriptedTaskExecutor {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            counter: AtomicUsize::new(0),
            queued: Mutex::new(Vec::new()),
        }
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.queued.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedTaskExecutor {
    async fn queue_task(
        &self,
        _context: &ExecutionContext,
        request: TaskRequest,
        reporter: TaskResultReporter,
    ) -> Result<String, EngineError> {
        let task_id = format!("task-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.queued
            .lock()
            .unwrap()
            .push((task_id.clone(), request));

        match &self.reply {
            Reply::Immediately(result) => reporter.report(&task_id, result.clone()),
            Reply::After(delay, result) => {
                let (delay, result, id) = (*delay, result.clone(), task_id.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    reporter.report(&id, result);
                });
            }
            Reply::Hold => {}
        }
        Ok(task_id)
    }
}

pub fn ok_result() -> TaskResult {
    TaskResult::Success(json!({ "ok": true }))
}

pub fn step(id: &str, step_type: &str) -> Node {
    Node::new(id, id, NodeCategory::Step, StepType::new(step_type))
}

/// root -> stage -> steps run one after another
pub fn stage_plan(plan_id: &str, steps: Vec<Node>) -> Plan {
    let mut plan = Plan::new(plan_id, plan_id, "root");
    plan.add_node(
        Node::new("root", "root", NodeCategory::Plan, StepType::new("Plan"))
            .with_children(vec!["stage".to_string()]),
    );
    let first = steps.first().map(|s| s.uuid.clone()).into_iter().collect();
    plan.add_node(
        Node::new("stage", "stage", NodeCategory::Stage, StepType::new("Stage"))
            .with_children(first),
    );

    let next_ids: Vec<Option<String>> = steps
        .iter()
        .skip(1)
        .map(|s| Some(s.uuid.clone()))
        .chain(std::iter::once(None))
        .collect();
    for (node, next) in steps.into_iter().zip(next_ids) {
        let node = match next {
            Some(next_node_id) => node.with_adviser(AdviserObtainment::NextStep { next_node_id }),
            None => node,
        };
        plan.add_node(node);
    }
    plan
}

/// root -> fork -> steps run side by side
pub fn fork_plan(plan_id: &str, steps: Vec<Node>) -> Plan {
    let mut plan = Plan::new(plan_id, plan_id, "root");
    plan.add_node(
        Node::new("root", "root", NodeCategory::Plan, StepType::new("Plan"))
            .with_children(vec!["fork".to_string()]),
    );
    plan.add_node(
        Node::new("fork", "fork", NodeCategory::Fork, StepType::new("Fork"))
            .with_children(steps.iter().map(|s| s.uuid.clone()).collect()),
    );
    for node in steps {
        plan.add_node(node);
    }
    plan
}

pub async fn engine_for(
    plan: Plan,
    steps: StepRegistry,
    tasks: Arc<dyn TaskExecutor>,
) -> Arc<OrchestrationEngine> {
    let plans = Arc::new(InMemoryPlanService::new());
    plans.register(plan).await;
    let config = EngineConfig {
        principal: "tester".to_string(),
        granted_permissions: vec![PIPELINE_EXECUTE.to_string()],
        ..EngineConfig::default()
    };
    OrchestrationEngine::builder(plans)
        .config(config)
        .steps(steps)
        .task_executor(tasks)
        .build()
}

pub fn registry() -> StepRegistry {
    StepRegistry::new()
}

pub fn register_sync(registry: &mut StepRegistry, step: Arc<RecordingSyncStep>) {
    registry.register(StepType::new(SYNC_STEP), Executable::Sync(step));
}

pub fn register_task(registry: &mut StepRegistry, step: Arc<RecordingTaskStep>) {
    registry.register(StepType::new(TASK_STEP), Executable::Task(step));
}

pub fn register_chain(registry: &mut StepRegistry, step: Arc<RecordingChainStep>) {
    registry.register(StepType::new(CHAIN_STEP), Executable::TaskChain(step));
}

pub async fn finish(run: PlanRun) -> Status {
    tokio::time::timeout(Duration::from_secs(10), run.wait())
        .await
        .expect("plan run timed out")
        .expect("engine shut down")
}

pub async fn executions(engine: &OrchestrationEngine, plan_execution_id: &str) -> Vec<NodeExecution> {
    engine
        .store()
        .list_by_plan_execution(plan_execution_id)
        .await
        .unwrap()
}

pub fn by_identifier<'a>(executions: &'a [NodeExecution], identifier: &str) -> Vec<&'a NodeExecution> {
    let mut matching: Vec<&NodeExecution> = executions
        .iter()
        .filter(|e| e.identifier == identifier)
        .collect();
    matching.sort_by_key(|e| e.retry_index);
    matching
}

pub fn only<'a>(executions: &'a [NodeExecution], identifier: &str) -> &'a NodeExecution {
    let matching = by_identifier(executions, identifier);
    assert_eq!(matching.len(), 1, "expected one execution of {}", identifier);
    matching[0]
}

/// Poll until the (latest) execution of `identifier` reaches `status`
pub async fn wait_for_status(
    engine: &OrchestrationEngine,
    plan_execution_id: &str,
    identifier: &str,
    status: Status,
) -> NodeExecution {
    let poll = async {
        loop {
            let all = executions(engine, plan_execution_id).await;
            if let Some(execution) = by_identifier(&all, identifier).last() {
                if execution.status == status {
                    return (*execution).clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .unwrap_or_else(|_| panic!("{} never reached {}", identifier, status))
}
