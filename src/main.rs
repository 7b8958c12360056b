use anyhow::{Context, Result};
use node_engine::cli::commands::{HistoryCommand, RunCommand, ValidateCommand};
use node_engine::cli::output::*;
use node_engine::cli::{Cli, Command};
use node_engine::core::config::{EngineConfig, PlanConfig};
use node_engine::core::{NodeCategory, Status};
use node_engine::execution::{EngineEvent, OrchestrationEngine};
use node_engine::persistence::{InMemoryNodeExecutionStore, InMemoryPlanService, NodeExecutionStore};
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_plan(cmd, cli.config.as_deref()).await?,
        Command::Validate(cmd) => validate_plan(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_engine_config(path: Option<&str>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load engine config from {}", path)),
        None => Ok(EngineConfig::default()),
    }
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn NodeExecutionStore>> {
    Ok(Arc::new(
        node_engine::persistence::SqliteNodeExecutionStore::with_default_path().await?,
    ))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn NodeExecutionStore>> {
    anyhow::bail!("History requires the sqlite feature")
}

async fn run_plan(cmd: &RunCommand, config_path: Option<&str>) -> Result<()> {
    let plan_config = PlanConfig::from_file(&cmd.file).context("Failed to load plan config")?;
    println!(
        "{} Loaded plan: {} ({} steps)",
        INFO,
        style(&plan_config.name).bold(),
        style(plan_config.step_count()).cyan()
    );

    let mut engine_config = load_engine_config(config_path)?;
    cmd.apply_to(&mut engine_config);

    let plan = plan_config.to_plan(plan_config.name.clone());
    let plan_id = plan.plan_id.clone();
    let plans = Arc::new(InMemoryPlanService::new());
    plans.register(plan).await;

    let store: Arc<dyn NodeExecutionStore> = if cmd.no_history {
        Arc::new(InMemoryNodeExecutionStore::new())
    } else {
        open_history().await?
    };

    let engine = OrchestrationEngine::builder(plans)
        .config(engine_config)
        .store(store)
        .build();

    let progress = create_progress_bar(plan_config.step_count());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if let EngineEvent::NodeConcluded {
            category: NodeCategory::Step,
            ..
        } = &event
        {
            bar.inc(1);
        }
        if let Some(line) = format_engine_event(&event) {
            bar.println(line);
        }
    });

    let run = engine.run_plan(engine.new_setup(plan_id)).await?;
    let plan_execution_id = run.plan_execution_id.clone();
    let status = run.wait().await?;
    progress.finish_and_clear();

    if !cmd.no_history {
        println!(
            "\n{} Node executions saved to history (ID: {})",
            INFO,
            style(&plan_execution_id).dim()
        );
    }

    match status {
        Status::Succeeded | Status::IgnoreFailed => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&plan_config.name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        status => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&plan_config.name).bold(),
                format_status(status)
            );
            error!("Plan run {} ended {}", plan_execution_id, status);
            std::process::exit(1);
        }
    }
}

fn validate_plan(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating plan...", INFO);

    match PlanConfig::from_file(&cmd.file) {
        Ok(config) => {
            let plan = config.to_plan(config.name.clone());
            let dangling = plan.dangling_references();
            if !dangling.is_empty() {
                println!("{} Validation failed:", CROSS);
                println!("  {}", style(format!("Undefined nodes: {}", dangling.join(", "))).red());
                std::process::exit(1);
            }

            println!("{} Plan configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Steps: {}", style(config.step_count()).cyan());
            println!("  Nodes: {}", style(plan.nodes.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&plan)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(plan_execution_id) = &cmd.plan_execution {
        let executions = store.list_by_plan_execution(plan_execution_id).await?;
        if executions.is_empty() {
            println!("{} Plan run not found", WARN);
            return Ok(());
        }

        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&executions)?);
        } else {
            println!("{} Plan run {}", INFO, style(plan_execution_id).cyan());
            for execution in &executions {
                println!("  {}", format_node_execution(execution));
            }
        }
        return Ok(());
    }

    let summaries = store.recent_plan_executions(cmd.limit).await?;
    if summaries.is_empty() {
        println!("{} No plan runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "plan_executions": summaries });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Plan runs (showing latest {}):", INFO, cmd.limit);
        for summary in &summaries {
            println!("  {}", format_plan_summary(summary));
        }
    }

    Ok(())
}
