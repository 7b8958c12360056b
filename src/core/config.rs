//! Plan and engine configuration from YAML

use crate::core::node::{AdviserObtainment, Node, NodeCategory, Plan, StepType};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Step type used for stage and plan container nodes
pub const STAGE_STEP_TYPE: &str = "Stage";
pub const PLAN_STEP_TYPE: &str = "Plan";
pub const FORK_STEP_TYPE: &str = "Fork";

/// Node id of the plan root; reserved
pub const ROOT_NODE_ID: &str = "plan";

/// Top-level plan configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Plan name
    pub name: String,

    /// Stages, executed in order
    pub stages: Vec<StageConfig>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,

    /// Human-readable stage name
    #[serde(default)]
    pub name: Option<String>,

    /// Run the steps of this stage in parallel
    #[serde(default)]
    pub parallel: bool,

    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step identifier
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Registered step type, e.g. `Log`, `Shell`, `ShellChain`
    #[serde(rename = "type")]
    pub step_type: String,

    /// Step-type-specific parameters
    #[serde(default)]
    pub spec: serde_json::Value,

    /// How many times to re-run the step after a failure
    #[serde(default)]
    pub retries: u32,

    /// Carry on with the next step when this one fails
    #[serde(default)]
    pub ignore_failure: bool,
}

impl PlanConfig {
    /// Load plan configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse plan configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PlanConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the plan configuration
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            anyhow::bail!("Plan '{}' has no stages", self.name);
        }

        // Identifiers share one namespace across stages and steps
        let mut seen_ids = HashSet::from([ROOT_NODE_ID]);
        for stage in &self.stages {
            if !seen_ids.insert(stage.id.as_str()) {
                anyhow::bail!("Duplicate identifier: {}", stage.id);
            }
            if stage.steps.is_empty() {
                anyhow::bail!("Stage '{}' has no steps", stage.id);
            }
            for step in &stage.steps {
                if !seen_ids.insert(step.id.as_str()) {
                    anyhow::bail!("Duplicate identifier: {}", step.id);
                }
                if step.step_type.trim().is_empty() {
                    anyhow::bail!("Step '{}' has an empty type", step.id);
                }
            }
        }

        Ok(())
    }

    /// Number of step nodes in the plan
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }

    /// Compile the configuration into a plan of nodes
    ///
    /// Siblings are chained with `NextStep` advisers; a parallel stage wraps its
    /// steps in a fork node.
    pub fn to_plan(&self, plan_id: impl Into<String>) -> Plan {
        let root_id = ROOT_NODE_ID.to_string();
        let mut plan = Plan::new(plan_id, self.name.clone(), root_id.clone());

        let stage_ids: Vec<String> = self.stages.iter().map(|s| s.id.clone()).collect();
        let mut root = Node::new(
            root_id,
            self.name.clone(),
            NodeCategory::Plan,
            StepType::new(PLAN_STEP_TYPE),
        );
        root.child_node_ids = stage_ids.first().cloned().into_iter().collect();
        plan.add_node(root);

        for (index, stage) in self.stages.iter().enumerate() {
            let mut stage_node = Node::new(
                stage.id.clone(),
                stage.id.clone(),
                NodeCategory::Stage,
                StepType::new(STAGE_STEP_TYPE),
            );
            stage_node.name = stage.name.clone().unwrap_or_else(|| stage.id.clone());
            if let Some(next) = stage_ids.get(index + 1) {
                stage_node.advisers.push(AdviserObtainment::NextStep {
                    next_node_id: next.clone(),
                });
            }

            let step_ids: Vec<String> = stage.steps.iter().map(|s| s.id.clone()).collect();
            if stage.parallel {
                let fork_id = format!("{}_parallel", stage.id);
                plan.add_node(
                    Node::new(
                        fork_id.clone(),
                        fork_id.clone(),
                        NodeCategory::Fork,
                        StepType::new(FORK_STEP_TYPE),
                    )
                    .with_children(step_ids.clone()),
                );
                stage_node.child_node_ids = vec![fork_id];
            } else {
                stage_node.child_node_ids = step_ids.first().cloned().into_iter().collect();
            }
            plan.add_node(stage_node);

            for (step_index, step) in stage.steps.iter().enumerate() {
                let mut node = Node::new(
                    step.id.clone(),
                    step.id.clone(),
                    NodeCategory::Step,
                    StepType::new(step.step_type.clone()),
                )
                .with_parameters(step.spec.clone());
                node.name = step.name.clone().unwrap_or_else(|| step.id.clone());

                if step.retries > 0 {
                    node.advisers.push(AdviserObtainment::Retry {
                        max_retries: step.retries,
                    });
                }
                if step.ignore_failure {
                    node.advisers.push(AdviserObtainment::IgnoreFailure);
                }
                if !stage.parallel {
                    if let Some(next) = step_ids.get(step_index + 1) {
                        node.advisers.push(AdviserObtainment::NextStep {
                            next_node_id: next.clone(),
                        });
                    }
                }
                plan.add_node(node);
            }
        }

        plan
    }
}

/// Engine tuning and identity, loadable from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of workers starting and resuming nodes
    pub workers: usize,

    /// Bounded capacity of the worker queue
    pub queue_capacity: usize,

    /// Number of event consumers; events of one node always land on the same one
    pub event_shards: usize,

    /// Timeout for local remote-task execution, in seconds
    pub task_timeout_secs: u64,

    /// How long unclaimed or cancelled notifications are remembered, in seconds
    pub notification_retention_secs: u64,

    pub account_id: String,

    pub org_id: Option<String>,

    pub project_id: Option<String>,

    /// Principal plans run as
    pub principal: String,

    /// Permissions granted to the principal
    pub granted_permissions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            event_shards: 4,
            task_timeout_secs: 3600,
            notification_retention_secs: 600,
            account_id: "default".to_string(),
            org_id: None,
            project_id: None,
            principal: "local-user".to_string(),
            granted_permissions: vec!["pipeline_execute".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        if config.workers == 0 || config.event_shards == 0 {
            anyhow::bail!("workers and event_shards must be at least 1");
        }
        Ok(config)
    }
}
