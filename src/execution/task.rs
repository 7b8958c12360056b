//! Remote task dispatch
//!
//! A [`TaskExecutor`] accepts a task and returns its id straight away; the
//! result is delivered later through the [`TaskResultReporter`] handed to it.

use crate::core::ExecutionContext;
use crate::execution::error::EngineError;
use crate::step::{TaskRequest, TaskResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Task type run by [`LocalTaskExecutor`]
pub const SHELL_TASK: &str = "shell";

/// Receiver of task results
pub trait TaskResultSink: Send + Sync {
    fn notify_task_result(&self, task_id: &str, result: TaskResult);
}

/// Handle a task executor reports results through
#[derive(Clone)]
pub struct TaskResultReporter {
    sink: Weak<dyn TaskResultSink>,
}

impl TaskResultReporter {
    pub fn new(sink: Weak<dyn TaskResultSink>) -> Self {
        Self { sink }
    }

    pub fn report(&self, task_id: &str, result: TaskResult) {
        match self.sink.upgrade() {
            Some(sink) => sink.notify_task_result(task_id, result),
            None => warn!("Dropping result of task {}, engine is gone", task_id),
        }
    }
}

/// Dispatches task requests to wherever tasks run
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Queue `request` and return its task id without waiting for the result
    async fn queue_task(
        &self,
        context: &ExecutionContext,
        request: TaskRequest,
        reporter: TaskResultReporter,
    ) -> Result<String, EngineError>;
}

#[derive(Debug, Deserialize)]
struct ShellTask {
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Runs `shell` tasks as local subprocesses
#[derive(Debug, Clone)]
pub struct LocalTaskExecutor {
    /// Shell used to interpret commands
    shell: String,

    /// Timeout applied when the request carries none, in seconds
    timeout_secs: u64,
}

impl LocalTaskExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            shell: "sh".to_string(),
            timeout_secs,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run a shell command to completion
    ///
    /// Non-zero exit, spawn failure and timeout all yield a failed result.
    async fn run(&self, task: ShellTask, timeout_secs: u64) -> TaskResult {
        debug!("Spawning '{}' for command: {}", self.shell, task.command);

        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(&task.command).kill_on_drop(true);
        if let Some(dir) = &task.working_dir {
            command.current_dir(dir);
        }
        command.envs(&task.env);

        let output = match timeout(Duration::from_secs(timeout_secs), command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return TaskResult::failure(format!("Failed to spawn command: {}", e)),
            Err(_) => {
                return TaskResult::failure(format!("Command timed out after {}s", timeout_secs))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            debug!("Command returned {} bytes of output", stdout.len());
            TaskResult::Success(json!({
                "stdout": stdout,
                "stderr": stderr,
                "exit_code": exit_code,
            }))
        } else {
            warn!("Command exited with code {}: {}", exit_code, stderr.trim());
            TaskResult::failure(format!("exited with code {}: {}", exit_code, stderr.trim()))
        }
    }
}

#[async_trait]
impl TaskExecutor for LocalTaskExecutor {
    async fn queue_task(
        &self,
        context: &ExecutionContext,
        request: TaskRequest,
        reporter: TaskResultReporter,
    ) -> Result<String, EngineError> {
        if request.task_type != SHELL_TASK {
            return Err(EngineError::TaskDispatch(format!(
                "unsupported task type '{}'",
                request.task_type
            )));
        }
        let task: ShellTask = serde_json::from_value(request.parameters)
            .map_err(|e| EngineError::TaskDispatch(format!("invalid shell task: {}", e)))?;

        let task_id = uuid::Uuid::new_v4().to_string();
        let timeout_secs = request.timeout_secs.unwrap_or(self.timeout_secs);
        info!("Queued task {} for {}", task_id, context.describe());

        let executor = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let result = executor.run(task, timeout_secs).await;
            reporter.report(&id, result);
        });

        Ok(task_id)
    }
}
