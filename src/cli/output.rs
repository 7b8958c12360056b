//! CLI output formatting

use crate::core::{NodeCategory, NodeExecution, Status};
use crate::execution::EngineEvent;
use crate::persistence::PlanExecutionSummary;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Progress bar over the step nodes of a plan
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let template = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";
    match ProgressStyle::default_bar().template(template) {
        Ok(style) => progress.set_style(style.progress_chars("#>-")),
        Err(_) => progress.set_style(ProgressStyle::default_bar()),
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a node status for display
pub fn format_status(status: Status) -> String {
    let label = status.to_string();
    match status {
        Status::Queued => style(label).dim().to_string(),
        Status::Running | Status::AsyncWaiting | Status::TaskWaiting => {
            style(label).yellow().to_string()
        }
        Status::Succeeded => style(label).green().to_string(),
        Status::IgnoreFailed => style(label).yellow().to_string(),
        Status::Failed | Status::Errored => style(label).red().to_string(),
        Status::Aborted => style(label).magenta().to_string(),
    }
}

fn status_icon(status: Option<Status>) -> Emoji<'static, 'static> {
    match status {
        Some(Status::Succeeded) => CHECK,
        Some(Status::IgnoreFailed) => WARN,
        Some(s) if s.is_terminal() => CROSS,
        Some(_) => SPINNER,
        None => INFO,
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Format an engine event for display
///
/// Queue and start events of container nodes are left out.
pub fn format_engine_event(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::PlanStarted {
            plan_execution_id,
            plan_id,
        } => Some(format!(
            "{} Starting plan {} ({})",
            ROCKET,
            style(plan_id).bold(),
            style(short_id(plan_execution_id)).dim()
        )),
        EngineEvent::NodeQueued {
            identifier,
            category: NodeCategory::Step,
            retry_index,
            ..
        } if *retry_index > 0 => Some(format!(
            "{} {} (retry {})",
            WARN,
            style(identifier).yellow(),
            retry_index
        )),
        EngineEvent::NodeQueued { .. } => None,
        EngineEvent::NodeStarted {
            identifier,
            category: NodeCategory::Step,
            mode,
            ..
        } => Some(format!(
            "{} {} {}",
            SPINNER,
            style(identifier).cyan(),
            style(mode).dim()
        )),
        EngineEvent::NodeStarted { .. } => None,
        EngineEvent::NodeConcluded {
            identifier,
            category,
            status,
            failure,
            ..
        } => {
            let label = format!("{} {}", category, identifier);
            Some(match failure {
                Some(failure) if !status.is_positive() => format!(
                    "{}{}: {} {}",
                    status_icon(Some(*status)),
                    style(label).bold(),
                    format_status(*status),
                    style(&failure.message).dim()
                ),
                _ => format!(
                    "{}{}: {}",
                    status_icon(Some(*status)),
                    style(label).bold(),
                    format_status(*status)
                ),
            })
        }
        EngineEvent::PlanCompleted {
            plan_execution_id,
            status,
        } => Some(format!(
            "{} Plan run ({}) finished {}",
            INFO,
            style(short_id(plan_execution_id)).dim(),
            format_status(*status)
        )),
    }
}

/// One-line summary of a plan run
pub fn format_plan_summary(summary: &PlanExecutionSummary) -> String {
    format!(
        "{} {} - {} - {} - {} nodes, {} failed - {}",
        status_icon(summary.status),
        style(short_id(&summary.plan_execution_id)).dim(),
        style(&summary.plan_id).bold(),
        summary
            .status
            .map(format_status)
            .unwrap_or_else(|| style("UNKNOWN").dim().to_string()),
        summary.node_count,
        summary.failed_nodes,
        style(summary.started_at.to_rfc3339()).dim()
    )
}

/// One line per node execution, indented by depth
pub fn format_node_execution(execution: &NodeExecution) -> String {
    let depth = execution.context.levels().len().saturating_sub(1);
    let mut line = format!(
        "{}{}{} {} [{}]",
        "  ".repeat(depth),
        status_icon(Some(execution.status)),
        style(&execution.identifier).bold(),
        format_status(execution.status),
        style(short_id(&execution.uuid)).dim()
    );
    if execution.retry_index > 0 {
        line.push_str(&format!(" retry {}", execution.retry_index));
    }
    if let (Some(started), Some(ended)) = (execution.started_at, execution.ended_at) {
        if let Ok(duration) = ended.signed_duration_since(started).to_std() {
            line.push_str(&format!(" {}", style(format_duration(duration)).dim()));
        }
    }
    if let Some(failure) = &execution.failure_info {
        line.push_str(&format!(" - {}", style(&failure.message).red()));
    }
    line
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
