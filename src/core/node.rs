//! Node definitions - the immutable units of work in a plan

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Category of a node; selects the strategy that drives it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Plan,
    Stage,
    Step,
    Fork,
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeCategory::Plan => "plan",
            NodeCategory::Stage => "stage",
            NodeCategory::Step => "step",
            NodeCategory::Fork => "fork",
        };
        f.write_str(name)
    }
}

/// Step type tag used to resolve a step implementation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepType(pub String);

impl StepType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Adviser attached to a node, consulted once the node concludes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdviserObtainment {
    /// Proceed to a sibling node after a positive status
    NextStep { next_node_id: String },

    /// Re-run the same node after a failure
    Retry { max_retries: u32 },

    /// Treat a failure as `IgnoreFailed` and carry on
    IgnoreFailure,
}

/// An immutable node definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Definition id, unique within the plan
    pub uuid: String,

    /// Identifier as written by the pipeline author
    pub identifier: String,

    pub name: String,

    pub category: NodeCategory,

    pub step_type: StepType,

    /// Step-type-specific configuration
    #[serde(default)]
    pub step_parameters: serde_json::Value,

    /// Children, in execution order
    #[serde(default)]
    pub child_node_ids: Vec<String>,

    #[serde(default)]
    pub advisers: Vec<AdviserObtainment>,
}

impl Node {
    pub fn new(
        uuid: impl Into<String>,
        identifier: impl Into<String>,
        category: NodeCategory,
        step_type: StepType,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            uuid: uuid.into(),
            name: identifier.clone(),
            identifier,
            category,
            step_type,
            step_parameters: serde_json::Value::Null,
            child_node_ids: Vec::new(),
            advisers: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.child_node_ids = children;
        self
    }

    pub fn with_adviser(mut self, adviser: AdviserObtainment) -> Self {
        self.advisers.push(adviser);
        self
    }
}

/// A compiled plan: its nodes keyed by id plus the root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    pub root_node_id: String,
    pub nodes: HashMap<String, Node>,
}

impl Plan {
    pub fn new(plan_id: impl Into<String>, name: impl Into<String>, root_node_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            name: name.into(),
            root_node_id: root_node_id.into(),
            nodes: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.uuid.clone(), node);
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Node ids referenced as children or adviser targets that are not defined
    pub fn dangling_references(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if !self.nodes.contains_key(&self.root_node_id) {
            missing.push(self.root_node_id.clone());
        }
        for node in self.nodes.values() {
            let next_ids = node.advisers.iter().filter_map(|a| match a {
                AdviserObtainment::NextStep { next_node_id } => Some(next_node_id),
                _ => None,
            });
            for id in node.child_node_ids.iter().chain(next_ids) {
                if !self.nodes.contains_key(id) {
                    missing.push(id.clone());
                }
            }
        }
        missing.sort();
        missing.dedup();
        missing
    }
}
