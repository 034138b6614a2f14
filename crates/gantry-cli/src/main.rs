use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use gantry_engine::handlers::{
    default_registry_with_interviewer, Generator, ProviderCliGenerator, SimulatedGenerator,
};
use gantry_engine::interviewer::{AutoApproveInterviewer, ConsoleInterviewer, Interviewer};
use gantry_engine::{
    classify, lint, load_checkpoint, transforms, unique_logs_dir, Executor, Graph, RunLog,
    RunStatus, Severity,
};

#[derive(Parser)]
#[command(name = "gantry", version, about = "Graph-driven pipeline runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lint a pipeline file and print its synopsis.
    Validate {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,
    },
    /// Execute a pipeline.
    Run {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,
        /// Log directory (default: .gantry/logs/<name>-<id>)
        #[arg(long)]
        logs: Option<PathBuf>,
        /// Resume from checkpoint.json in the --logs directory
        #[arg(long)]
        resume: bool,
        /// Use the deterministic simulated generator instead of a provider CLI
        #[arg(long)]
        simulate: bool,
        /// Answer human gates with their first option automatically
        #[arg(long)]
        auto_approve: bool,
        /// Only log warnings and errors
        #[arg(long)]
        quiet: bool,
    },
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let parsed = gantry_dot::parse(&source)?;
    let mut graph = Graph::from_dot(parsed)?;
    transforms::apply_all(&mut graph, None)?;
    Ok(graph)
}

fn run_validate(pipeline: &Path) -> anyhow::Result<ExitCode> {
    let graph = load_graph(pipeline)?;
    let diagnostics = lint(&graph);
    let mut has_error = false;
    for diag in &diagnostics {
        has_error |= diag.severity == Severity::Error;
        let location = diag
            .node_id
            .as_deref()
            .map(|n| format!(" (node {})", n))
            .or_else(|| {
                diag.edge
                    .as_ref()
                    .map(|(f, t)| format!(" (edge {} -> {})", f, t))
            })
            .unwrap_or_default();
        println!(
            "[{}] {}: {}{}",
            diag.severity.as_str(),
            diag.rule,
            diag.message,
            location
        );
    }
    println!("SYNOPSIS: {}", classify(&graph).as_str());
    Ok(if has_error {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_pipeline(
    pipeline: PathBuf,
    logs: Option<PathBuf>,
    resume: bool,
    simulate: bool,
    auto_approve: bool,
) -> anyhow::Result<ExitCode> {
    if resume && logs.is_none() {
        bail!("--resume requires --logs pointing at the previous run's directory");
    }
    let graph = load_graph(&pipeline)?;

    let logs_dir = match logs {
        Some(dir) => dir,
        None => {
            let stem = pipeline
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "pipeline".to_string());
            unique_logs_dir(Path::new(".gantry/logs"), &stem)
        }
    };
    info!(logs = %logs_dir.display(), "logging run to");

    let generator: Arc<dyn Generator> = if simulate {
        Arc::new(SimulatedGenerator)
    } else {
        Arc::new(ProviderCliGenerator)
    };
    let interviewer: Arc<dyn Interviewer> = if auto_approve {
        Arc::new(AutoApproveInterviewer)
    } else {
        Arc::new(ConsoleInterviewer)
    };
    let run_root = std::env::current_dir().context("cannot determine working directory")?;
    let registry = default_registry_with_interviewer(generator, interviewer, &run_root, &logs_dir);
    let executor = Executor::new(registry).with_logs(RunLog::new(&logs_dir));

    let cancel = executor.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next step boundary");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let result = if resume {
        let checkpoint = load_checkpoint(&logs_dir)
            .await?
            .with_context(|| format!("no checkpoint.json in {}", logs_dir.display()))?;
        executor.run_resumed(&graph, checkpoint).await?
    } else {
        executor.run(&graph).await?
    };

    match result.status {
        RunStatus::Completed => {
            info!(
                exit = result.exit_node.as_deref().unwrap_or("-"),
                nodes = result.completed_nodes.len(),
                "pipeline completed"
            );
            Ok(ExitCode::SUCCESS)
        }
        RunStatus::Canceled => {
            warn!("pipeline canceled; checkpoint kept for --resume");
            Ok(ExitCode::from(1))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate { pipeline } => run_validate(&pipeline),
        Command::Run {
            pipeline,
            logs,
            resume,
            simulate,
            auto_approve,
            quiet,
        } => {
            let default_level = if quiet { "warn" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
                )
                .init();
            run_pipeline(pipeline, logs, resume, simulate, auto_approve).await
        }
    }
}
