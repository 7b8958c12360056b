//! Step executable contracts
//!
//! Each contract wraps the step's real logic with the same protocol:
//!
//! 1. acquire a [`SecurityContextGuard`] for the execution context,
//! 2. on entry points, run `validate_resources` and stop on denial,
//! 3. call the step's own method,
//! 4. drop the guard, whichever way step 3 ended.
//!
//! Task chains validate once, at `start_chain_link`; later links and the
//! finalization only re-enter the security context.

use crate::core::{ExecutionContext, ExecutionMode};
use crate::security::SecurityContextGuard;
use crate::step::{
    PassThroughData, ResponseHandle, StepError, StepInputPackage, StepParameters, StepResponse,
    TaskChainResponse, TaskRequest,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A step that completes within the call
#[async_trait]
pub trait SyncExecutableWithRbac: Send + Sync {
    /// Check the principal may use the resources this step touches
    async fn validate_resources(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
    ) -> Result<(), StepError>;

    async fn execute_sync(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
        pass_through: Option<PassThroughData>,
    ) -> Result<StepResponse, StepError> {
        let _guard = SecurityContextGuard::acquire(context);
        self.validate_resources(context, params).await?;
        self.execute_sync_after_rbac(context, params, inputs, pass_through)
            .await
    }

    async fn execute_sync_after_rbac(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
        pass_through: Option<PassThroughData>,
    ) -> Result<StepResponse, StepError>;
}

/// A step that dispatches one remote task and finishes on its result
#[async_trait]
pub trait TaskExecutableWithRbac: Send + Sync {
    async fn validate_resources(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
    ) -> Result<(), StepError>;

    async fn obtain_task(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> Result<TaskRequest, StepError> {
        let _guard = SecurityContextGuard::acquire(context);
        self.validate_resources(context, params).await?;
        self.obtain_task_after_rbac(context, params, inputs).await
    }

    async fn obtain_task_after_rbac(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> Result<TaskRequest, StepError>;

    async fn handle_task_result(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        response: ResponseHandle,
    ) -> Result<StepResponse, StepError> {
        let _guard = SecurityContextGuard::acquire(context);
        self.handle_task_result_with_security_context(context, params, response)
            .await
    }

    async fn handle_task_result_with_security_context(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        response: ResponseHandle,
    ) -> Result<StepResponse, StepError>;
}

/// A step made of several remote tasks run one after another
#[async_trait]
pub trait TaskChainExecutableWithRbac: Send + Sync {
    async fn validate_resources(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
    ) -> Result<(), StepError>;

    async fn start_chain_link(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> Result<TaskChainResponse, StepError> {
        let _guard = SecurityContextGuard::acquire(context);
        self.validate_resources(context, params).await?;
        self.start_chain_link_after_rbac(context, params, inputs).await
    }

    async fn start_chain_link_after_rbac(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
    ) -> Result<TaskChainResponse, StepError>;

    async fn execute_next_link(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
        pass_through: PassThroughData,
        response: ResponseHandle,
    ) -> Result<TaskChainResponse, StepError> {
        let _guard = SecurityContextGuard::acquire(context);
        self.execute_next_link_with_security_context(context, params, inputs, pass_through, response)
            .await
    }

    async fn execute_next_link_with_security_context(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        inputs: &StepInputPackage,
        pass_through: PassThroughData,
        response: ResponseHandle,
    ) -> Result<TaskChainResponse, StepError>;

    async fn finalize_execution(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        pass_through: PassThroughData,
        response: ResponseHandle,
    ) -> Result<StepResponse, StepError> {
        let _guard = SecurityContextGuard::acquire(context);
        self.finalize_execution_with_security_context(context, params, pass_through, response)
            .await
    }

    async fn finalize_execution_with_security_context(
        &self,
        context: &ExecutionContext,
        params: &StepParameters,
        pass_through: PassThroughData,
        response: ResponseHandle,
    ) -> Result<StepResponse, StepError>;
}

/// A registered step implementation in one of the three shapes
#[derive(Clone)]
pub enum Executable {
    Sync(Arc<dyn SyncExecutableWithRbac>),
    Task(Arc<dyn TaskExecutableWithRbac>),
    TaskChain(Arc<dyn TaskChainExecutableWithRbac>),
}

impl Executable {
    /// Execution mode facilitation assigns to nodes of this step
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Executable::Sync(_) => ExecutionMode::Sync,
            Executable::Task(_) => ExecutionMode::Task,
            Executable::TaskChain(_) => ExecutionMode::TaskChain,
        }
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Executable::{}", self.mode())
    }
}
