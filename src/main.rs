use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::WeftConfig;
use weft_core::event::EventBus;
use weft_core::workflow::Workflow;
use weft_engine::{DagExecutor, DirectoryLoader, ExecutionState, RunOptions, Runtime};

#[derive(Parser)]
#[command(name = "weft", version, about = "Wave-scheduled workflow engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml", env = "WEFT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow and print the execution snapshot as JSON
    Run {
        /// Workflow definition (JSON)
        workflow: PathBuf,
        /// Run input as inline JSON
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,
        /// Read the run input from a JSON file
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Directory holding sub-workflows as <id>.json
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
        /// Abort the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Stream execution events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },
    /// Check a workflow's structure and node configs without running it
    Validate {
        workflow: PathBuf,
    },
    /// Print the wave schedule and loop edges of a workflow
    Plan {
        workflow: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            workflow,
            input,
            input_file,
            workflows_dir,
            timeout,
            events,
        } => {
            let workflow = read_workflow(&workflow)?;
            let input = read_input(input.as_deref(), input_file.as_deref())?;
            let dir = workflows_dir.unwrap_or_else(|| config.workflows_dir());
            run(config, workflow, input, dir, timeout, events).await
        }
        Commands::Validate { workflow } => {
            let workflow = read_workflow(&workflow)?;
            let executor = DagExecutor::new(Runtime::builder(config).build()?);
            let schedule = executor.plan(&workflow)?;
            println!(
                "{}: ok ({} nodes, {} waves)",
                workflow.id,
                workflow.nodes.len(),
                schedule.len()
            );
            Ok(())
        }
        Commands::Plan { workflow } => {
            let workflow = read_workflow(&workflow)?;
            let executor = DagExecutor::new(Runtime::builder(config).build()?);
            let schedule = executor.plan(&workflow)?;
            let loops: Vec<Value> = workflow
                .loop_edges()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "from": e.from,
                        "to": e.to,
                        "max_iterations": e.loop_spec.map(|s| s.max_iterations),
                    })
                })
                .collect();
            let plan = json!({
                "workflow_id": workflow.id,
                "waves": schedule.waves(),
                "loops": loops,
            });
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
    }
}

async fn run(
    config: WeftConfig,
    workflow: Workflow,
    input: Value,
    workflows_dir: PathBuf,
    timeout: Option<u64>,
    stream_events: bool,
) -> anyhow::Result<()> {
    let bus = Arc::new(EventBus::new(config.engine.event_capacity));
    let printer = stream_events.then(|| {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
        })
    });

    let runtime = Runtime::builder(config)
        .loader(DirectoryLoader::new(workflows_dir.clone()))
        .notifier_arc(bus.clone())
        .build()?;
    let executor = DagExecutor::new(runtime);

    let workflow = Arc::new(workflow);
    let state = Arc::new(ExecutionState::new(&workflow, input));
    let mut options = RunOptions::default();
    if let Some(secs) = timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    // Ctrl-C cancels the run; the snapshot is still printed.
    let cancel = CancellationToken::new();
    options = options.with_cancel(cancel.clone());
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    info!(workflow_id = %workflow.id, dir = %workflows_dir.display(), "Starting run");
    let result = executor.execute(workflow.clone(), state.clone(), options).await;
    ctrl_c.abort();

    drop(executor);
    drop(bus);
    if let Some(handle) = printer {
        handle.await.ok();
    }

    let snapshot = json!({
        "snapshot": state.snapshot(),
        "output": state.final_output(&workflow),
        "error": result.as_ref().err().map(ToString::to_string),
    });
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    result.map_err(Into::into)
}

fn load_config(path: &Path) -> anyhow::Result<WeftConfig> {
    if path.exists() {
        WeftConfig::load(path).with_context(|| format!("loading config {}", path.display()))
    } else {
        Ok(WeftConfig::default())
    }
}

fn read_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow {}", path.display()))?;
    Workflow::from_json(&text).with_context(|| format!("parsing workflow {}", path.display()))
}

fn read_input(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Value> {
    let text = match (inline, file) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading input {}", path.display()))?,
        (None, None) => return Ok(Value::Null),
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}
