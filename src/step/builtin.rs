//! Built-in steps
//!
//! - `Log`: writes a message to the log and records it as an outcome (sync)
//! - `Shell`: runs one command through the task executor (single task)
//! - `ShellChain`: runs several commands one after another (task chain)
//!
//! All of them require `pipeline_execute` on the plan; the shell steps also
//! require `connector_access` when they name a connector.

use crate::core::ExecutionContext;
use crate::execution::task::SHELL_TASK;
use crate::security::access::{CONNECTOR_ACCESS, PIPELINE_EXECUTE};
use crate::security::{AccessControlClient, Resource};
use crate::step::{
    PassThroughData, ResponseData, ResponseHandle, StepError, StepInputPackage, StepParameters,
    StepResponse, SyncExecutableWithRbac, TaskChainExecutableWithRbac, TaskChainResponse,
    TaskExecutableWithRbac, TaskRequest, TaskResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

async fn check_pipeline_access(
    acl: &dyn AccessControlClient,
    context: &ExecutionContext,
) -> Result<(), StepError> {
    let pipeline = Resource::new("PIPELINE", Some(context.plan_id().to_string()));
    acl.check_for_access_or_deny(context, &pipeline, PIPELINE_EXECUTE)
        .await
}

async fn check_connector_access(
    acl: &dyn AccessControlClient,
    context: &ExecutionContext,
    connector_ref: Option<&str>,
) -> Result<(), StepError> {
    check_pipeline_access(acl, context).await?;
    if let Some(connector) = connector_ref {
        let resource = Resource::new("CONNECTOR", Some(connector.to_string()));
        acl.check_for_access_or_deny(context, &resource, CONNECTOR_ACCESS)
            .await?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LogParams {
    message: String,
}

/// Logs its `message` parameter
pub struct LogStep {
    acl: Arc<dyn AccessControlClient>,
}

impl LogStep {
    pub fn new(acl: Arc<dyn AccessControlClient>) -> Self {
        Self { acl }
    }
}

#[async_trait]
impl SyncExecutableWithRbac for LogStep {
    async fn validate_resources(
        &self,
        context: &ExecutionContext,
        _params: &StepParameters,
    ) -> Result<(), StepError> {
        check_pipeline_access(self.acl.as_ref(), context).await
    }

    async fn execute_sync_after_rbac(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        _inputs: &StepInputPackage,
        _pass_through: Option<PassThroughData>,
    ) -> Result<StepResponse, StepError> {
        let params: LogParams = params.parse()?;
        info!("[{}] {}", context.describe(), params.message);
        Ok(StepResponse::succeeded().with_outcome("message", json!(params.message)))
    }
}

#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    connector_ref: Option<String>,
}

fn shell_request(
    command: &str,
    working_dir: &Option<String>,
    env: &HashMap<String, String>,
    timeout_secs: Option<u64>,
) -> TaskRequest {
    let mut request = TaskRequest::new(
        SHELL_TASK,
        json!({
            "command": command,
            "working_dir": working_dir,
            "env": env,
        }),
    );
    request.timeout_secs = timeout_secs;
    request
}

/// Runs `command` as a single remote task
pub struct ShellStep {
    acl: Arc<dyn AccessControlClient>,
}

impl ShellStep {
    pub fn new(acl: Arc<dyn AccessControlClient>) -> Self {
        Self { acl }
    }
}

#[async_trait]
impl TaskExecutableWithRbac for ShellStep {
    async fn validate_resources(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
    ) -> Result<(), StepError> {
        let params: ShellParams = params.parse()?;
        check_connector_access(self.acl.as_ref(), context, params.connector_ref.as_deref()).await
    }

    async fn obtain_task_after_rbac(
        &self,
        _context: &ExecutionContext,
        params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> Result<TaskRequest, StepError> {
        let params: ShellParams = params.parse()?;
        Ok(shell_request(
            &params.command,
            &params.working_dir,
            &params.env,
            params.timeout_secs,
        ))
    }

    async fn handle_task_result_with_security_context(
        &self,
        _context: &ExecutionContext,
        _params: &StepParameters,
        response: ResponseHandle,
    ) -> Result<StepResponse, StepError> {
        let output = response.task_output().await?;
        Ok(StepResponse::succeeded()
            .with_outcome("stdout", output["stdout"].clone())
            .with_outcome("exit_code", output["exit_code"].clone()))
    }
}

#[derive(Debug, Deserialize)]
struct ShellChainParams {
    commands: Vec<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    connector_ref: Option<String>,
}

impl ShellChainParams {
    /// Link dispatching command `index`; the last command ends the chain
    fn link(&self, index: usize, state: &ChainState) -> Result<TaskChainResponse, StepError> {
        let pass_through = PassThroughData::new(
            serde_json::to_value(state).map_err(|e| StepError::Internal(e.to_string()))?,
        );
        let request = shell_request(
            &self.commands[index],
            &self.working_dir,
            &self.env,
            self.timeout_secs,
        );
        if index + 1 == self.commands.len() {
            Ok(TaskChainResponse::last(request, pass_through))
        } else {
            Ok(TaskChainResponse::next(request, pass_through))
        }
    }
}

/// What a shell chain carries between links
#[derive(Debug, Default, Serialize, Deserialize)]
struct ChainState {
    /// Index of the command the pending task runs
    current: usize,
    outputs: Vec<String>,
}

fn stdout_of(output: &Value) -> String {
    output["stdout"].as_str().unwrap_or_default().to_string()
}

/// Runs `commands` in order, one remote task per command
pub struct ShellChainStep {
    acl: Arc<dyn AccessControlClient>,
}

impl ShellChainStep {
    pub fn new(acl: Arc<dyn AccessControlClient>) -> Self {
        Self { acl }
    }
}

#[async_trait]
impl TaskChainExecutableWithRbac for ShellChainStep {
    async fn validate_resources(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
    ) -> Result<(), StepError> {
        let params: ShellChainParams = params.parse()?;
        check_connector_access(self.acl.as_ref(), context, params.connector_ref.as_deref()).await
    }

    async fn start_chain_link_after_rbac(
        &self,
        _context: &ExecutionContext,
        params: &StepParameters,
        _inputs: &StepInputPackage,
    ) -> Result<TaskChainResponse, StepError> {
        let params: ShellChainParams = params.parse()?;
        let state = ChainState::default();
        if params.commands.is_empty() {
            let pass_through = PassThroughData::new(
                serde_json::to_value(&state).map_err(|e| StepError::Internal(e.to_string()))?,
            );
            return Ok(TaskChainResponse::end(pass_through));
        }
        params.link(0, &state)
    }

    async fn execute_next_link_with_security_context(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        _inputs: &StepInputPackage,
        pass_through: PassThroughData,
        response: ResponseHandle,
    ) -> Result<TaskChainResponse, StepError> {
        let params: ShellChainParams = params.parse()?;
        let mut state: ChainState = pass_through.parse()?;
        let output = response.task_output().await?;
        state.outputs.push(stdout_of(&output));

        state.current += 1;
        if state.current >= params.commands.len() {
            return Err(StepError::UnexpectedResponse(format!(
                "chain already ran all {} commands",
                params.commands.len()
            )));
        }
        debug!(
            "{} continuing with command {} of {}",
            context.describe(),
            state.current + 1,
            params.commands.len()
        );
        params.link(state.current, &state)
    }

    async fn finalize_execution_with_security_context(
        &self,
        _context: &ExecutionContext,
        _params: &StepParameters,
        pass_through: PassThroughData,
        response: ResponseHandle,
    ) -> Result<StepResponse, StepError> {
        let mut state: ChainState = pass_through.parse()?;
        match response.resolve().await? {
            Some(ResponseData::Task(TaskResult::Success(output))) => {
                state.outputs.push(stdout_of(&output))
            }
            Some(ResponseData::Task(TaskResult::Failure { message })) => {
                return Err(StepError::TaskFailed(message))
            }
            Some(ResponseData::Child { .. }) => {
                return Err(StepError::UnexpectedResponse(
                    "shell chain received a child outcome".to_string(),
                ))
            }
            None => {}
        }
        Ok(StepResponse::succeeded().with_outcome("outputs", json!(state.outputs)))
    }
}
