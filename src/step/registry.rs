//! Step type to step implementation lookup

use crate::core::StepType;
use crate::security::AccessControlClient;
use crate::step::builtin::{LogStep, ShellChainStep, ShellStep};
use crate::step::Executable;
use std::collections::HashMap;
use std::sync::Arc;

pub const LOG_STEP: &str = "Log";
pub const SHELL_STEP: &str = "Shell";
pub const SHELL_CHAIN_STEP: &str = "ShellChain";

#[derive(Clone, Default, Debug)]
pub struct StepRegistry {
    steps: HashMap<StepType, Executable>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `Log`, `Shell` and `ShellChain` steps, checking
    /// access through `acl`
    pub fn with_builtins(acl: Arc<dyn AccessControlClient>) -> Self {
        let mut registry = Self::new();
        registry.register(
            StepType::new(LOG_STEP),
            Executable::Sync(Arc::new(LogStep::new(Arc::clone(&acl)))),
        );
        registry.register(
            StepType::new(SHELL_STEP),
            Executable::Task(Arc::new(ShellStep::new(Arc::clone(&acl)))),
        );
        registry.register(
            StepType::new(SHELL_CHAIN_STEP),
            Executable::TaskChain(Arc::new(ShellChainStep::new(acl))),
        );
        registry
    }

    /// Register `executable` for `step_type`, replacing any earlier one
    pub fn register(&mut self, step_type: StepType, executable: Executable) {
        self.steps.insert(step_type, executable);
    }

    pub fn get(&self, step_type: &StepType) -> Option<Executable> {
        self.steps.get(step_type).cloned()
    }

    pub fn contains(&self, step_type: &StepType) -> bool {
        self.steps.contains_key(step_type)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
