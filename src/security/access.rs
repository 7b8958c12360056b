//! Access control checks performed by step resource validation

use crate::core::{ExecutionContext, Principal};
use crate::step::StepError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Permission every built-in step requires on its project scope
pub const PIPELINE_EXECUTE: &str = "pipeline_execute";

/// Permission required to use a connector from a step
pub const CONNECTOR_ACCESS: &str = "connector_access";

/// Account/org/project the checked resource lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceScope {
    pub account_id: String,
    pub org_id: Option<String>,
    pub project_id: Option<String>,
}

impl ResourceScope {
    pub fn from_context(context: &ExecutionContext) -> Self {
        let setup = context.setup();
        Self {
            account_id: setup.account_id.clone(),
            org_id: setup.org_id.clone(),
            project_id: setup.project_id.clone(),
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account/{}", self.account_id)?;
        if let Some(org) = &self.org_id {
            write!(f, "/org/{}", org)?;
        }
        if let Some(project) = &self.project_id {
            write!(f, "/project/{}", project)?;
        }
        Ok(())
    }
}

/// The resource a permission is checked against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub resource_type: String,
    pub identifier: Option<String>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, identifier: Option<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            identifier,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "{}:{}", self.resource_type, id),
            None => f.write_str(&self.resource_type),
        }
    }
}

/// Trait for access control backends
#[async_trait]
pub trait AccessControlClient: Send + Sync {
    async fn check_access(
        &self,
        principal: &Principal,
        scope: &ResourceScope,
        resource: &Resource,
        permission: &str,
    ) -> bool;

    /// Check access for the context's principal, failing with `AccessDenied`
    async fn check_for_access_or_deny(
        &self,
        context: &ExecutionContext,
        resource: &Resource,
        permission: &str,
    ) -> Result<(), StepError> {
        let scope = ResourceScope::from_context(context);
        let denied = |principal: &str| StepError::AccessDenied {
            principal: principal.to_string(),
            permission: permission.to_string(),
            resource: format!("{} in {}", resource, scope),
        };

        let Some(principal) = context.principal() else {
            warn!("No principal on {}, denying {}", context.describe(), permission);
            return Err(denied("<anonymous>"));
        };

        if self.check_access(principal, &scope, resource, permission).await {
            debug!("'{}' granted {} on {}", principal.name, permission, resource);
            Ok(())
        } else {
            Err(denied(&principal.name))
        }
    }
}

/// In-memory grants table
#[derive(Debug, Clone, Default)]
pub struct StaticAccessControl {
    grants: HashMap<String, HashSet<String>>,
    allow_all: bool,
}

impl StaticAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant every permission to everyone
    pub fn allow_all() -> Self {
        Self {
            grants: HashMap::new(),
            allow_all: true,
        }
    }

    pub fn grant<I, S>(mut self, principal: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grants
            .entry(principal.to_string())
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl AccessControlClient for StaticAccessControl {
    async fn check_access(
        &self,
        principal: &Principal,
        _scope: &ResourceScope,
        _resource: &Resource,
        permission: &str,
    ) -> bool {
        self.allow_all
            || self
                .grants
                .get(&principal.name)
                .is_some_and(|perms| perms.contains(permission))
    }
}
