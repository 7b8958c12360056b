//! Scoped security context and access control
//!
//! Every step contract runs its logic while holding a [`SecurityContextGuard`]
//! bound to the node's execution context. The guard publishes the principal
//! for that node for as long as it is alive and withdraws it when dropped, so
//! release happens on every exit path.

pub mod access;

pub use access::{
    AccessControlClient, Resource, ResourceScope, StaticAccessControl, CONNECTOR_ACCESS,
    PIPELINE_EXECUTE,
};

use crate::core::{ExecutionContext, Principal};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::debug;

#[derive(Debug)]
struct ScopeEntry {
    principal: Option<Principal>,
    depth: usize,
}

fn scopes() -> MutexGuard<'static, HashMap<String, ScopeEntry>> {
    static SCOPES: OnceLock<Mutex<HashMap<String, ScopeEntry>>> = OnceLock::new();
    SCOPES
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn scope_key(context: &ExecutionContext) -> String {
    context
        .current_runtime_id()
        .unwrap_or_else(|| context.plan_execution_id())
        .to_string()
}

/// RAII guard holding the security context of one node execution
#[derive(Debug)]
#[must_use = "the security context is released as soon as the guard is dropped"]
pub struct SecurityContextGuard {
    key: String,
}

impl SecurityContextGuard {
    /// Enter the security context for `context`
    pub fn acquire(context: &ExecutionContext) -> Self {
        let key = scope_key(context);
        let mut scopes = scopes();
        let entry = scopes.entry(key.clone()).or_insert_with(|| ScopeEntry {
            principal: context.principal().cloned(),
            depth: 0,
        });
        entry.depth += 1;
        debug!("Security context acquired for {} (depth {})", key, entry.depth);
        Self { key }
    }
}

impl Drop for SecurityContextGuard {
    fn drop(&mut self) {
        let mut scopes = scopes();
        if let Some(entry) = scopes.get_mut(&self.key) {
            entry.depth = entry.depth.saturating_sub(1);
            debug!("Security context released for {} (depth {})", self.key, entry.depth);
            if entry.depth == 0 {
                scopes.remove(&self.key);
            }
        }
    }
}

/// Principal of the security context currently held for `context`
pub fn current_principal(context: &ExecutionContext) -> Option<Principal> {
    scopes()
        .get(&scope_key(context))
        .and_then(|entry| entry.principal.clone())
}

/// How many guards are currently held for `context`
pub fn active_scope_depth(context: &ExecutionContext) -> usize {
    scopes()
        .get(&scope_key(context))
        .map(|entry| entry.depth)
        .unwrap_or(0)
}
