//! CLI command definitions

use crate::core::config::EngineConfig;
use clap::Args;

/// Run a plan
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to plan YAML file
    #[arg(short, long)]
    pub file: String,

    /// Number of workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Principal the plan runs as
    #[arg(long)]
    pub principal: Option<String>,

    /// Permission granted to the principal (repeatable)
    #[arg(long)]
    pub grant: Vec<String>,

    /// Don't save node executions to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Apply command-line overrides on top of a loaded engine config
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(principal) = &self.principal {
            config.principal = principal.clone();
        }
        for permission in &self.grant {
            if !config.granted_permissions.contains(permission) {
                config.granted_permissions.push(permission.clone());
            }
        }
    }
}

/// Validate a plan file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to plan YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output the compiled plan in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Show the node executions of one plan run
    #[arg(long)]
    pub plan_execution: Option<String>,

    /// Number of recent plan runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
