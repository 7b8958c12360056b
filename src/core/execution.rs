//! Node execution records - the mutable runtime side of a node

use crate::core::{
    context::ExecutionContext,
    node::{Node, NodeCategory},
    state::Status,
};
use crate::step::PassThroughData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a node is executed, decided during facilitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    Sync,
    Task,
    TaskChain,
    /// Run the first child; siblings follow through advisers
    Child,
    /// Run every child in parallel
    Children,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::Sync => "SYNC",
            ExecutionMode::Task => "TASK",
            ExecutionMode::TaskChain => "TASK_CHAIN",
            ExecutionMode::Child => "CHILD",
            ExecutionMode::Children => "CHILDREN",
        };
        f.write_str(name)
    }
}

/// What a started node is waiting on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutableResponse {
    Task {
        task_id: String,
    },
    TaskChain {
        task_id: Option<String>,
        chain_end: bool,
        pass_through: PassThroughData,
    },
    Child {
        child_id: String,
    },
    Children {
        child_ids: Vec<String>,
    },
}

impl ExecutableResponse {
    /// Ids whose answers the node waits on
    pub fn correlation_ids(&self) -> Vec<String> {
        match self {
            ExecutableResponse::Task { task_id }
            | ExecutableResponse::TaskChain {
                task_id: Some(task_id),
                ..
            } => vec![task_id.clone()],
            ExecutableResponse::TaskChain { task_id: None, .. } => Vec::new(),
            ExecutableResponse::Child { child_id } => vec![child_id.clone()],
            ExecutableResponse::Children { child_ids } => child_ids.clone(),
        }
    }
}

/// Why a node failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Node or step configuration could not be resolved
    Definition,
    /// Resource validation denied the step
    Authorization,
    /// Worker submission or event dispatch failed
    Dispatch,
    /// A remote task reported failure
    Task,
    /// The step itself reported failure
    Application,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureInfo {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Metadata supplied when a node is initiated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateMetadata {
    /// Zero for the first attempt, incremented by retries
    pub retry_index: u32,

    /// Free-form tags carried onto the record
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl InitiateMetadata {
    pub fn retry(retry_index: u32) -> Self {
        Self {
            retry_index,
            ..Self::default()
        }
    }
}

/// Parent/notify/predecessor ids resolved for a new execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionLinks {
    pub notify_id: Option<String>,
    pub parent_id: Option<String>,
    pub previous_id: Option<String>,
}

/// Runtime record for one activation of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Runtime id; equals the current level's runtime id in `context`
    pub uuid: String,

    pub node_id: String,

    pub identifier: String,

    pub category: NodeCategory,

    pub context: ExecutionContext,

    pub status: Status,

    pub mode: Option<ExecutionMode>,

    /// Runtime id of the parent execution
    pub parent_id: Option<String>,

    /// Correlation id the parent waits on; `None` for roots
    pub notify_id: Option<String>,

    /// Sibling (or failed attempt) this execution follows
    pub previous_id: Option<String>,

    /// Sibling (or retry) that followed this execution
    pub next_id: Option<String>,

    pub retry_index: u32,

    #[serde(default)]
    pub tags: HashMap<String, String>,

    #[serde(default)]
    pub executable_responses: Vec<ExecutableResponse>,

    /// Terminal statuses of finished children, keyed by child runtime id
    #[serde(default)]
    pub child_statuses: HashMap<String, Status>,

    /// Step outcomes reported by the step response
    #[serde(default)]
    pub outcomes: serde_json::Map<String, serde_json::Value>,

    pub failure_info: Option<FailureInfo>,

    pub created_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub ended_at: Option<DateTime<Utc>>,

    /// Bumped on every persisted update
    pub version: u64,
}

impl NodeExecution {
    /// Materialize a queued record for `node` running under `context`
    ///
    /// Returns `None` when the context has no current level.
    pub fn queued(
        context: &ExecutionContext,
        node: &Node,
        metadata: &InitiateMetadata,
        links: ExecutionLinks,
    ) -> Option<Self> {
        let uuid = context.current_runtime_id()?.to_string();
        Some(Self {
            uuid,
            node_id: node.uuid.clone(),
            identifier: node.identifier.clone(),
            category: node.category,
            context: context.clone(),
            status: Status::Queued,
            mode: None,
            parent_id: links.parent_id,
            notify_id: links.notify_id,
            previous_id: links.previous_id,
            next_id: None,
            retry_index: metadata.retry_index,
            tags: metadata.tags.clone(),
            executable_responses: Vec::new(),
            child_statuses: HashMap::new(),
            outcomes: serde_json::Map::new(),
            failure_info: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            version: 0,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn last_executable_response(&self) -> Option<&ExecutableResponse> {
        self.executable_responses.last()
    }

    /// Apply a status change, stamping start/end times
    ///
    /// Returns false, leaving the record untouched, for illegal transitions.
    /// A failure may still be overridden to `IgnoreFailed`.
    pub fn apply_status(&mut self, to: Status) -> bool {
        if !self.status.can_transition_to(to) && !self.status.can_override_to(to) {
            return false;
        }
        if to == Status::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.status = to;
        true
    }
}
