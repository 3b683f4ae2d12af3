//! Converge CLI - idempotent DHCP server configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use converge_catalog::{Catalog, DesiredConfig, ResourceCatalog};
use converge_core::{ExecContext, Outcome, RunReport};
use converge_execution::{ConvergenceEngine, EngineConfig, ExecutionPlan};
use converge_tools::{ExecutorStateQuery, MemoryHost, PowerShellExecutor};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status of a run with failed actions.
const EXIT_FAILED: u8 = 1;
/// Exit status when the document cannot be planned.
const EXIT_PLAN: u8 = 2;

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "Converge a DHCP server to its desired configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a document and print warnings
    Validate {
        /// Desired configuration (YAML, or JSON by extension)
        document: PathBuf,
    },
    /// Print the ordered plan
    Plan {
        /// Desired configuration
        document: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Converge the host
    Apply {
        /// Desired configuration
        document: PathBuf,
        /// Actions running at once
        #[arg(long, default_value = "1")]
        concurrency: NonZeroUsize,
        /// Per-step timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
        /// Write the JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Run against an in-memory host instead of PowerShell
        #[arg(long)]
        simulate: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Validate { document } => {
            let Some(catalog) = load(&document) else {
                return Ok(ExitCode::from(EXIT_PLAN));
            };
            println!(
                "{}: {} actions, {} warnings",
                document.display(),
                catalog.actions.len(),
                catalog.warnings.len()
            );
            for warning in &catalog.warnings {
                println!("  warning: {}", warning);
            }
        }
        Commands::Plan { document, json } => {
            let Some(catalog) = load(&document) else {
                return Ok(ExitCode::from(EXIT_PLAN));
            };
            let warnings = catalog.warnings;
            let engine = ConvergenceEngine::new(ExecContext::from_host(Arc::new(MemoryHost::new())));
            let plan = match engine.plan(catalog.actions) {
                Ok(plan) => plan,
                Err(e) => {
                    error!("{}", e);
                    return Ok(ExitCode::from(EXIT_PLAN));
                }
            };

            if json {
                let steps = plan_json(&plan);
                let warnings: Vec<String> = warnings.iter().map(ToString::to_string).collect();
                let output = serde_json::json!({ "actions": steps, "warnings": warnings });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_plan(&plan);
                for warning in &warnings {
                    println!("  warning: {}", warning);
                }
            }
        }
        Commands::Apply {
            document,
            concurrency,
            timeout,
            report,
            json,
            simulate,
        } => {
            let Some(catalog) = load(&document) else {
                return Ok(ExitCode::from(EXIT_PLAN));
            };

            let ctx = if simulate {
                info!("Simulating against an in-memory host");
                ExecContext::from_host(Arc::new(MemoryHost::new()))
            } else {
                let executor = Arc::new(PowerShellExecutor::new());
                ExecContext::new(executor.clone(), Arc::new(ExecutorStateQuery::new(executor)))
            };

            let engine = ConvergenceEngine::new(ctx).with_config(
                EngineConfig::new()
                    .with_max_concurrent(concurrency)
                    .with_action_timeout(Duration::from_secs(timeout)),
            );
            let plan = match engine.plan(catalog.actions) {
                Ok(plan) => plan,
                Err(e) => {
                    error!("{}", e);
                    return Ok(ExitCode::from(EXIT_PLAN));
                }
            };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing running actions");
                    on_interrupt.cancel();
                }
            });

            let run = engine.execute_with_cancel(&plan, cancel).await;

            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_string_pretty(&run)?)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                info!("Report written to {}", path.display());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_report(&run);
            }

            if !run.is_success() {
                return Ok(ExitCode::from(EXIT_FAILED));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Parse and expand a document; problems are logged.
fn load(path: &Path) -> Option<Catalog> {
    let catalog = DesiredConfig::load(path).and_then(|config| ResourceCatalog::build(&config));
    match catalog {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

fn plan_json(plan: &ExecutionPlan) -> Vec<serde_json::Value> {
    plan.actions()
        .enumerate()
        .map(|(position, action)| {
            let requires: Vec<&str> = plan
                .predecessors(position)
                .iter()
                .map(|&p| plan.action(p).id.as_str())
                .collect();
            serde_json::json!({
                "index": position,
                "id": action.id.as_str(),
                "resource": action.resource.to_string(),
                "requires": requires,
            })
        })
        .collect()
}

fn print_plan(plan: &ExecutionPlan) {
    println!("Plan ({} actions)", plan.len());
    for (position, action) in plan.actions().enumerate() {
        let requires: Vec<String> = plan
            .predecessors(position)
            .iter()
            .map(|&p| plan.action(p).id.to_string())
            .collect();
        if requires.is_empty() {
            println!("  {:>3}. {}", position + 1, action.id);
        } else {
            println!("  {:>3}. {} (after {})", position + 1, action.id, requires.join(", "));
        }
    }
    for id in plan.excluded() {
        println!("  ---  {} (not applicable)", id);
    }
}

fn print_report(report: &RunReport) {
    println!(
        "Run {}: {} unchanged, {} applied, {} failed, {} skipped{}",
        report.run_id,
        report.summary.unchanged,
        report.summary.applied,
        report.summary.failed,
        report.summary.skipped,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for record in &report.records {
        let status = match &record.outcome {
            Outcome::Unchanged => "UNCHANGED",
            Outcome::Applied => "APPLIED",
            Outcome::Failed { .. } => "FAILED",
            Outcome::Skipped { .. } => "SKIPPED",
        };
        println!("  {:<9} | {} | {}", status, record.action_id, record.detail);
    }
}
