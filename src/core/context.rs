//! Execution context - where in the node tree a unit of work sits

use crate::core::node::{Node, NodeCategory, StepType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity on whose behalf a plan runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Account/org/project scope plus the plan run this context belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSetup {
    pub account_id: String,
    pub org_id: Option<String>,
    pub project_id: Option<String>,
    pub plan_id: String,
    pub plan_execution_id: String,
    pub principal: Option<Principal>,
}

impl ExecutionSetup {
    /// Create a setup for a new plan run
    pub fn new(account_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            org_id: None,
            project_id: None,
            plan_id: plan_id.into(),
            plan_execution_id: uuid::Uuid::new_v4().to_string(),
            principal: None,
        }
    }

    pub fn with_project(mut self, org_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
}

/// One entry in the ancestry chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Runtime id of the node execution at this level
    pub runtime_id: String,

    /// Node definition id
    pub node_id: String,

    /// Human-facing identifier from the plan
    pub identifier: String,

    pub category: NodeCategory,

    pub step_type: StepType,
}

impl Level {
    /// Build the level a node execution occupies
    pub fn from_node(runtime_id: impl Into<String>, node: &Node) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            node_id: node.uuid.clone(),
            identifier: node.identifier.clone(),
            category: node.category,
            step_type: node.step_type.clone(),
        }
    }
}

/// Ordered, append-only chain of levels
///
/// Levels are shared behind an `Arc` and never mutated; deriving a child copies
/// the parent's chain and appends exactly one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    setup: Arc<ExecutionSetup>,
    levels: Arc<[Level]>,
}

impl ExecutionContext {
    /// Root context for a plan run, with no levels yet
    pub fn new(setup: ExecutionSetup) -> Self {
        Self {
            setup: Arc::new(setup),
            levels: Arc::from(Vec::new()),
        }
    }

    pub fn setup(&self) -> &ExecutionSetup {
        &self.setup
    }

    pub fn plan_id(&self) -> &str {
        &self.setup.plan_id
    }

    pub fn plan_execution_id(&self) -> &str {
        &self.setup.plan_execution_id
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.setup.principal.as_ref()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Derive the context for a child by appending one level
    pub fn clone_for_child(&self, level: Level) -> Self {
        let mut levels = self.levels.to_vec();
        levels.push(level);
        Self {
            setup: Arc::clone(&self.setup),
            levels: Arc::from(levels),
        }
    }

    /// Derive the context for a sibling: same ancestry, different last level
    ///
    /// On a root context this behaves like `clone_for_child`.
    pub fn clone_for_sibling(&self, level: Level) -> Self {
        self.parent().clone_for_child(level)
    }

    /// Context of the parent level (the root context for top-level nodes)
    pub fn parent(&self) -> Self {
        let len = self.levels.len().saturating_sub(1);
        Self {
            setup: Arc::clone(&self.setup),
            levels: Arc::from(self.levels[..len].to_vec()),
        }
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn current_runtime_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.runtime_id.as_str())
    }

    /// Runtime id of the parent level; `None` for a root node
    pub fn parent_runtime_id(&self) -> Option<&str> {
        let len = self.levels.len();
        if len < 2 {
            return None;
        }
        Some(self.levels[len - 2].runtime_id.as_str())
    }

    pub fn current_category(&self) -> Option<NodeCategory> {
        self.current_level().map(|l| l.category)
    }

    /// Short description used in log lines
    pub fn describe(&self) -> String {
        match self.current_level() {
            Some(level) => format!(
                "{}/{} ({})",
                self.setup.plan_execution_id, level.identifier, level.runtime_id
            ),
            None => format!("{}/<root>", self.setup.plan_execution_id),
        }
    }
}
