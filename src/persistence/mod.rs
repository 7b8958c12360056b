//! Persistence layer: plan definitions and node execution records

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteNodeExecutionStore;

use crate::core::{Node, NodeExecution, Plan, Status};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Source of plan and node definitions
#[async_trait::async_trait]
pub trait PlanService: Send + Sync {
    async fn fetch_plan(&self, plan_id: &str) -> Result<Option<Arc<Plan>>>;

    async fn fetch_node(&self, plan_id: &str, node_id: &str) -> Result<Option<Node>> {
        Ok(self
            .fetch_plan(plan_id)
            .await?
            .and_then(|plan| plan.node(node_id).cloned()))
    }
}

/// Plans held in memory
#[derive(Default)]
pub struct InMemoryPlanService {
    plans: RwLock<HashMap<String, Arc<Plan>>>,
}

impl InMemoryPlanService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, plan: Plan) {
        self.plans
            .write()
            .await
            .insert(plan.plan_id.clone(), Arc::new(plan));
    }
}

#[async_trait::async_trait]
impl PlanService for InMemoryPlanService {
    async fn fetch_plan(&self, plan_id: &str) -> Result<Option<Arc<Plan>>> {
        Ok(self.plans.read().await.get(plan_id).cloned())
    }
}

/// Summary of one plan run, derived from its node executions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExecutionSummary {
    pub plan_execution_id: String,

    pub plan_id: String,

    /// Status of the root node, if it has been recorded
    pub status: Option<Status>,

    pub node_count: usize,

    pub failed_nodes: usize,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,
}

impl PlanExecutionSummary {
    /// Summarize the node executions of a single plan run
    pub fn from_executions(executions: &[NodeExecution]) -> Option<Self> {
        let first = executions.first()?;
        let root = executions.iter().find(|e| e.context.levels().len() == 1);
        Some(Self {
            plan_execution_id: first.context.plan_execution_id().to_string(),
            plan_id: first.context.plan_id().to_string(),
            status: root.map(|r| r.status),
            node_count: executions.len(),
            failed_nodes: executions.iter().filter(|e| e.status.is_failure()).count(),
            started_at: executions
                .iter()
                .map(|e| e.created_at)
                .min()
                .unwrap_or(first.created_at),
            ended_at: root.and_then(|r| r.ended_at),
        })
    }
}

/// Storage for node execution records
///
/// Updates are optimistic: a record is read, changed and written back only if
/// its version has not moved in between.
#[async_trait::async_trait]
pub trait NodeExecutionStore: Send + Sync {
    async fn create(&self, execution: &NodeExecution) -> Result<()>;

    async fn get(&self, execution_id: &str) -> Result<Option<NodeExecution>>;

    /// Write `execution` if the stored version is still `expected_version`
    async fn replace(&self, execution: &NodeExecution, expected_version: u64) -> Result<bool>;

    async fn list_by_plan_execution(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>>;

    /// Most recent plan runs, newest first
    async fn recent_plan_executions(&self, limit: usize) -> Result<Vec<PlanExecutionSummary>>;

    /// Apply `change` to a record, retrying on version conflicts
    ///
    /// `change` returns false to leave the record as it is; the call then
    /// returns `None`, as it does for unknown ids.
    async fn update(
        &self,
        execution_id: &str,
        change: &(dyn for<'c> Fn(&'c mut NodeExecution) -> bool + Send + Sync),
    ) -> Result<Option<NodeExecution>> {
        loop {
            let Some(current) = self.get(execution_id).await? else {
                return Ok(None);
            };
            let mut updated = current.clone();
            if !change(&mut updated) {
                return Ok(None);
            }
            updated.version = current.version + 1;
            if self.replace(&updated, current.version).await? {
                return Ok(Some(updated));
            }
            tracing::debug!("Version conflict on {}, retrying", execution_id);
        }
    }

    /// Move a record to `to` if its status is one of `from`
    async fn update_status(
        &self,
        execution_id: &str,
        to: Status,
        from: &[Status],
    ) -> Result<Option<NodeExecution>> {
        let from = from.to_vec();
        self.update(execution_id, &move |execution: &mut NodeExecution| {
            from.contains(&execution.status) && execution.apply_status(to)
        })
        .await
    }
}

/// In-memory store (for tests or runs without history)
#[derive(Default)]
pub struct InMemoryNodeExecutionStore {
    executions: RwLock<HashMap<String, NodeExecution>>,
}

impl InMemoryNodeExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl NodeExecutionStore for InMemoryNodeExecutionStore {
    async fn create(&self, execution: &NodeExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.uuid) {
            anyhow::bail!("Node execution {} already exists", execution.uuid);
        }
        executions.insert(execution.uuid.clone(), execution.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<NodeExecution>> {
        Ok(self.executions.read().await.get(execution_id).cloned())
    }

    async fn replace(&self, execution: &NodeExecution, expected_version: u64) -> Result<bool> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.uuid) {
            Some(stored) if stored.version == expected_version => {
                *stored = execution.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_plan_execution(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        let executions = self.executions.read().await;
        let mut result: Vec<NodeExecution> = executions
            .values()
            .filter(|e| e.context.plan_execution_id() == plan_execution_id)
            .cloned()
            .collect();
        result.sort_by_key(|e| e.created_at);
        Ok(result)
    }

    async fn recent_plan_executions(&self, limit: usize) -> Result<Vec<PlanExecutionSummary>> {
        let executions = self.executions.read().await;
        let mut by_run: HashMap<&str, Vec<NodeExecution>> = HashMap::new();
        for execution in executions.values() {
            by_run
                .entry(execution.context.plan_execution_id())
                .or_default()
                .push(execution.clone());
        }
        let mut summaries: Vec<PlanExecutionSummary> = by_run
            .values()
            .filter_map(|runs| PlanExecutionSummary::from_executions(runs))
            .collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries.truncate(limit);
        Ok(summaries)
    }
}
