//! `troupe` command-line entry point.

mod config;

use clap::{Parser, Subcommand};
use config::TroupeConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use troupe_core::{MessageKind, RoleId, RunStatus};
use troupe_orchestrator::{
    DependencyScheduler, FailurePolicy, MessageBus, MessageFilter, RunOutcome, RunSnapshot,
    TmuxController, WorkflowEngine,
};
use troupe_state::{
    CheckpointStore, FileCheckpointStore, FileMessageLog, FileOutputLog, MessageLog,
    WorkflowCheckpoint,
};

#[derive(Parser)]
#[command(
    name = "troupe",
    version,
    about = "Troupe: run a team of worker agents in dependency order"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "troupe.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run
    Run {
        /// Run identifier (a random one is generated otherwise)
        #[arg(long)]
        run_id: Option<String>,
        /// Stop every agent as soon as one fails
        #[arg(long)]
        fail_fast: bool,
    },
    /// Continue an interrupted run from its checkpoint
    Resume {
        run_id: String,
        /// Restart agents that failed or timed out
        #[arg(long)]
        retry_failed: bool,
    },
    /// Show the agents of a run
    Status {
        run_id: String,
        /// Print the checkpoint as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show messages exchanged during a run, newest first
    Messages {
        run_id: String,
        /// Only messages visible to this role
        #[arg(long)]
        role: Option<String>,
        /// Only messages of this kind (FINDING, QUESTION, ...)
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Check the agent graph and print the execution order
    Validate,
    /// List saved runs
    Runs,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = TroupeConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run { run_id, fail_fast } => run(&config, run_id, fail_fast).await,
        Commands::Resume {
            run_id,
            retry_failed,
        } => resume(&config, &run_id, retry_failed).await,
        Commands::Status { run_id, json } => status(&config, &run_id, json).await,
        Commands::Messages {
            run_id,
            role,
            kind,
            limit,
        } => messages(&config, &run_id, role, kind, limit).await,
        Commands::Validate => validate(&config),
        Commands::Runs => runs(&config).await,
    }
}

async fn backends(
    config: &TroupeConfig,
) -> anyhow::Result<(Arc<dyn CheckpointStore>, Arc<dyn MessageLog>)> {
    let dir = config.runs_dir();
    let store = FileCheckpointStore::new(dir.clone()).await?;
    let log = FileMessageLog::new(dir).await?;
    Ok((Arc::new(store), Arc::new(log)))
}

/// Per-agent output transcripts live next to the checkpoints.
async fn output_log(config: &TroupeConfig) -> anyhow::Result<Arc<FileOutputLog>> {
    Ok(Arc::new(FileOutputLog::new(config.runs_dir()).await?))
}

async fn load_checkpoint(config: &TroupeConfig, run_id: &str) -> anyhow::Result<WorkflowCheckpoint> {
    let (store, _) = backends(config).await?;
    store
        .load(run_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No run named '{run_id}' under {}", config.runs_dir().display()))
}

async fn run(config: &TroupeConfig, run_id: Option<String>, fail_fast: bool) -> anyhow::Result<()> {
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let (store, log) = backends(config).await?;
    if store.load(&run_id).await?.is_some() {
        anyhow::bail!("Run '{run_id}' already exists, use `troupe resume {run_id}`");
    }

    let mut engine_config = config.engine.clone();
    if fail_fast {
        engine_config.failure_policy = FailurePolicy::FailFast;
    }
    let controller = Arc::new(TmuxController::new(config.controller.clone()));
    let mut engine = WorkflowEngine::new(
        run_id.clone(),
        &config.agents(),
        engine_config,
        controller,
        store,
        log,
    )?
    .with_output_log(output_log(config).await?);

    info!(
        run_id = %run_id,
        session = %config.controller.session,
        "Starting run, attach with `tmux attach -t {}`",
        config.controller.session
    );
    drive(&mut engine).await
}

async fn resume(config: &TroupeConfig, run_id: &str, retry_failed: bool) -> anyhow::Result<()> {
    let (store, log) = backends(config).await?;
    let controller = Arc::new(TmuxController::new(config.controller.clone()));
    let mut engine = WorkflowEngine::resume(
        run_id,
        &config.agents(),
        config.engine.clone(),
        controller,
        store,
        log,
        retry_failed,
    )
    .await?
    .with_output_log(output_log(config).await?);
    drive(&mut engine).await
}

/// Run to completion, aborting on Ctrl-C, and report the outcome.
async fn drive(engine: &mut WorkflowEngine) -> anyhow::Result<()> {
    let progress = tokio::spawn(log_progress(engine.subscribe()));
    let result = engine.run_until(shutdown_signal()).await;
    progress.abort();
    report(&result?)
}

async fn log_progress(mut updates: tokio::sync::watch::Receiver<RunSnapshot>) {
    let mut last_counts = None;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        if last_counts != Some(snapshot.counts) {
            info!(tick = snapshot.tick, counts = %snapshot.counts, "Progress");
            last_counts = Some(snapshot.counts);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    warn!("Ctrl-C received");
}

fn report(outcome: &RunOutcome) -> anyhow::Result<()> {
    println!(
        "Run {} {} after {} ticks ({})",
        outcome.run_id, outcome.status, outcome.ticks, outcome.counts
    );
    for failure in &outcome.failures {
        println!("  {failure}");
    }
    match outcome.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Aborted => {
            println!("Resume with `troupe resume {}`", outcome.run_id);
            Ok(())
        }
        _ => anyhow::bail!("Run {} did not complete", outcome.run_id),
    }
}

async fn status(config: &TroupeConfig, run_id: &str, json: bool) -> anyhow::Result<()> {
    let checkpoint = load_checkpoint(config, run_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }
    println!(
        "Run {}: {} at tick {} (saved {}, {} messages)",
        checkpoint.run_id,
        checkpoint.run_status,
        checkpoint.tick,
        checkpoint.saved_at.format("%Y-%m-%d %H:%M:%S UTC"),
        checkpoint.last_message_seq
    );
    println!(
        "{:<18} {:<8} {:>5} {:>7}  DETAIL",
        "ROLE", "STATUS", "ITER", "ATTEMPT"
    );
    for agent in &checkpoint.agents {
        let detail = agent.error.as_deref().unwrap_or(agent.activity.as_str());
        println!(
            "{:<18} {:<8} {:>5} {:>7}  {}",
            agent.role.as_str(),
            agent.status.to_string(),
            agent.iteration,
            agent.attempt,
            detail
        );
    }
    Ok(())
}

async fn messages(
    config: &TroupeConfig,
    run_id: &str,
    role: Option<String>,
    kind: Option<String>,
    limit: usize,
) -> anyhow::Result<()> {
    let kind = match kind {
        Some(tag) => Some(
            MessageKind::parse(&tag).ok_or_else(|| anyhow::anyhow!("Unknown message kind '{tag}'"))?,
        ),
        None => None,
    };
    let (_, log) = backends(config).await?;
    let roles = config
        .agents()
        .into_iter()
        .filter(|a| a.enabled)
        .map(|a| a.role)
        .collect();
    let bus = MessageBus::restore(run_id, roles, log, 0).await?;
    let filter = MessageFilter {
        kind,
        recipient: role.map(RoleId::from),
        ..MessageFilter::default()
    };
    let found = bus.query(&filter, limit);
    if found.is_empty() {
        println!("No messages.");
    }
    for message in found {
        println!("{}", message.summary());
    }
    Ok(())
}

fn validate(config: &TroupeConfig) -> anyhow::Result<()> {
    let agents = config.agents();
    let scheduler = DependencyScheduler::new(&agents)?;
    println!("Execution order:");
    for (i, role) in scheduler.execution_order().iter().enumerate() {
        let deps = scheduler.dependencies_of(role.as_str());
        let model = agents
            .iter()
            .find(|a| &a.role == role)
            .map_or("?", |a| a.model.as_str());
        if deps.is_empty() {
            println!("  {}. {role} ({model})", i + 1);
        } else {
            let deps: Vec<&str> = deps.iter().map(RoleId::as_str).collect();
            println!("  {}. {role} ({model}) after {}", i + 1, deps.join(", "));
        }
    }
    let disabled: Vec<&str> = agents
        .iter()
        .filter(|a| !a.enabled)
        .map(|a| a.role.as_str())
        .collect();
    if !disabled.is_empty() {
        println!("Disabled: {}", disabled.join(", "));
    }
    Ok(())
}

async fn runs(config: &TroupeConfig) -> anyhow::Result<()> {
    let (store, _) = backends(config).await?;
    let ids = store.list().await?;
    if ids.is_empty() {
        println!("No runs under {}", config.runs_dir().display());
        return Ok(());
    }
    for id in ids {
        match store.load(&id).await {
            Ok(Some(cp)) => println!(
                "{:<38} {:<12} tick {:>5}  {}/{} done  {}",
                id,
                cp.run_status.to_string(),
                cp.tick,
                cp.count(troupe_core::AgentStatus::Done),
                cp.agents.len(),
                cp.saved_at.format("%Y-%m-%d %H:%M:%S")
            ),
            Ok(None) => {}
            Err(e) => println!("{id:<38} unreadable: {e}"),
        }
    }
    Ok(())
}
