//! `crewforge` command-line interface.
//!
//! Validates topology files, prints the built-in article crew, and executes a
//! topology against the deterministic dry-run backend.

mod dry_run;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use crewforge_core::TaskId;
use crewforge_orchestrator::{article_crew, RunReport, RunStatus, Topology};
use crewforge_tools::{HumanInputTool, StdinHumanChannel};
use dry_run::{dry_run_backend, stand_in_tools};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crewforge", about = "crewforge: task-graph orchestration for worker crews")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a topology file and print its execution order
    Validate {
        /// Path to the topology file
        path: PathBuf,
    },
    /// Print the built-in article crew topology
    Example {
        /// Article topic
        #[arg(long, default_value = "The future of AI")]
        topic: String,
        /// Target language for the translation task
        #[arg(long, default_value = "French")]
        language: String,
    },
    /// Run a topology against the dry-run backend
    Run {
        /// Path to the topology file
        path: PathBuf,
        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Validate { path } => {
            let topology = Topology::load(&path)
                .with_context(|| format!("Failed to load topology '{}'", path.display()))?;
            let (graph, workers) = topology.into_graph(dry_run_backend)?;

            println!(
                "{}: {} worker(s), {} task(s), final task '{}'",
                path.display(),
                workers.len(),
                graph.len(),
                graph.final_task().id
            );
            println!("Execution order:");
            for (i, node) in graph.topological_order().iter().enumerate() {
                let mode = if node.concurrency_eligible {
                    ""
                } else {
                    " [sequential]"
                };
                if node.depends_on.is_empty() {
                    println!("  {}. {} ({}){mode}", i + 1, node.id, node.worker);
                } else {
                    let deps: Vec<&str> = node.depends_on.iter().map(TaskId::as_str).collect();
                    println!(
                        "  {}. {} ({}) after {}{mode}",
                        i + 1,
                        node.id,
                        node.worker,
                        deps.join(", ")
                    );
                }
            }
        }
        Commands::Example { topic, language } => {
            print!("{}", article_crew(&topic, &language).to_toml_string()?);
        }
        Commands::Run { path, json } => {
            let topology = Topology::load(&path)
                .with_context(|| format!("Failed to load topology '{}'", path.display()))?;

            let mut tools = stand_in_tools(topology.tools);
            tools.register(Arc::new(HumanInputTool::new(Arc::new(StdinHumanChannel))));
            info!(count = tools.tool_count(), "Tools registered");

            let scheduler = topology.into_scheduler(dry_run_backend, Arc::new(tools))?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling run");
                    on_interrupt.cancel();
                }
            });

            let report = scheduler.run_with_cancellation(cancel).await;
            if json {
                println!("{}", report.to_json()?);
            } else {
                print_summary(&report);
            }
            if report.status != RunStatus::Success {
                anyhow::bail!("Run finished with status {:?}", report.status);
            }
        }
    }

    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("Run {} finished: {:?} in {} ms", report.run_id, report.status, report.duration_ms);
    for task in &report.tasks {
        let result = &task.result;
        match (&result.produced_by, &result.error) {
            (_, Some(error)) => println!("  {} {}: {error}", result.task_id, task.state),
            (Some(worker), None) => println!(
                "  {} {} by {worker} ({:?})",
                result.task_id, task.state, result.status
            ),
            (None, None) => println!("  {} {}", result.task_id, task.state),
        }
    }
    println!("Workers:");
    for activity in &report.workers {
        let m = &activity.metrics;
        println!(
            "  {}: {} request(s), {} tool call(s), {} delegation(s) sent, {} ms throttled",
            activity.worker, m.requests, m.tool_calls, m.delegations_sent, m.throttled_ms
        );
    }
    if let Some(output) = report.output() {
        println!("\nFinal output ({}):\n{output}", report.final_task);
    }
}
