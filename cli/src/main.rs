// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Vigil CLI
//!
//! Drives one automation cycle in-process: starts a run, tails its status,
//! prompts for plan approval at the gate, and prints the final report.
//! `status` and `results` inspect the run store of a previous invocation.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use vigil_core::application::engine::{RunEngine, StartRun};
use vigil_core::domain::config::RunConfig;
use vigil_core::domain::run::{RunStatus, StatusView};
use vigil_core::infrastructure::json_store::{JsonCheckpointStore, JsonRunStore};
use vigil_core::infrastructure::learning_store::JsonlLearningStore;

/// Vigil - detect, analyze, plan, execute, report, learn
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for run records, checkpoints, and learning records
    #[arg(long, global = true, env = "VIGIL_DATA_DIR", default_value = "./data")]
    store: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "VIGIL_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run and drive it to completion
    Run {
        /// Unique run id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Domain tag for this run
        #[arg(long)]
        domain: String,

        /// Path to the JSON input data
        #[arg(long)]
        data: PathBuf,

        /// Optional YAML run configuration (per-phase LLM overrides, options)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Execute the plan without asking for approval
        #[arg(long)]
        auto_approve: bool,
    },

    /// Show the status block of a run
    Status {
        run_id: String,
    },

    /// Show the full results of a run
    Results {
        run_id: String,

        /// Print only the generated report text
        #[arg(long)]
        report: bool,
    },
}

fn build_engine(store_dir: &PathBuf) -> RunEngine {
    RunEngine::new(
        Arc::new(JsonRunStore::new(store_dir.clone())),
        Arc::new(JsonlLearningStore::new(store_dir.join("learning.jsonl"))),
        Arc::new(JsonCheckpointStore::new(store_dir.clone())),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Run {
            id,
            domain,
            data,
            config,
            auto_approve,
        } => run_cycle(&cli.store, id, domain, data, config, auto_approve).await,
        Commands::Status { run_id } => show_status(&cli.store, &run_id).await,
        Commands::Results { run_id, report } => show_results(&cli.store, &run_id, report).await,
    }
}

async fn run_cycle(
    store: &PathBuf,
    id: Option<String>,
    domain: String,
    data_path: PathBuf,
    config_path: Option<PathBuf>,
    auto_approve: bool,
) -> Result<()> {
    let data: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&data_path)
            .with_context(|| format!("failed to read {}", data_path.display()))?,
    )
    .context("input data is not valid JSON")?;

    let config: RunConfig = match &config_path {
        Some(path) => serde_yaml::from_str(
            &std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
        )
        .context("run configuration is not valid YAML")?,
        None => RunConfig::default(),
    };

    let run_id = id.unwrap_or_else(|| format!("run-{}", uuid::Uuid::new_v4()));
    let engine = build_engine(store);

    // Pick up any runs a previous invocation left unfinished.
    let resumed = engine.resume().await?;
    if resumed > 0 {
        info!(resumed, "resumed unfinished runs");
    }

    println!("{} {}", "starting run".bold(), run_id.cyan());
    engine
        .start_run(StartRun {
            run_id: run_id.clone(),
            domain,
            data,
            config,
            auto_approve,
        })
        .await?;

    let mut last_status: Option<RunStatus> = None;
    let mut gate_answered = false;
    loop {
        let view = engine.get_status(&run_id).await?;

        if last_status != Some(view.status) {
            println!("  {} {}", "→".dimmed(), format_status(&view));
            last_status = Some(view.status);
        }

        match view.status {
            RunStatus::PendingApproval if !gate_answered => {
                gate_answered = true;
                let full = engine.get_full(&run_id).await?;
                if let Some(plan) = &full.plan {
                    println!("\n{}", "proposed plan".bold().underline());
                    println!(
                        "  risk level: {}   actions: {}",
                        plan.risk_level.yellow(),
                        plan.actions.len()
                    );
                    for action in &plan.actions {
                        println!(
                            "  [{}] {} {} ({})",
                            action.id.dimmed(),
                            action.action_type.green(),
                            action.target,
                            action.description
                        );
                    }
                }

                let approved = dialoguer::Confirm::new()
                    .with_prompt("approve this plan?")
                    .default(false)
                    .interact()?;
                if approved {
                    engine.approve_plan(&run_id).await?;
                } else {
                    engine.cancel(&run_id).await?;
                }
                // Fall through to keep polling until terminal.
            }
            status if status.is_terminal() => break,
            _ => {}
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    let full = engine.get_full(&run_id).await?;
    println!();
    match full.status.status {
        RunStatus::Completed => println!("{}", "run completed".green().bold()),
        RunStatus::Cancelled => println!("{}", "run cancelled".yellow().bold()),
        RunStatus::Failed => println!(
            "{} {}",
            "run failed:".red().bold(),
            full.failure.as_deref().unwrap_or("unknown failure")
        ),
        _ => {}
    }
    if let Some(summary) = &full.summary {
        println!("{}", summary);
    }
    if let Some(reporting) = &full.reporting {
        println!("\n{}\n{}", "report".bold().underline(), reporting.report);
    }

    engine.shutdown().await;
    Ok(())
}

async fn show_status(store: &PathBuf, run_id: &str) -> Result<()> {
    let engine = build_engine(store);
    let view = engine.get_status(run_id).await?;

    println!("{}", format_status(&view));
    for (name, done) in [
        ("detection", view.detection_complete),
        ("analysis", view.analysis_complete),
        ("planning", view.planning_complete),
        ("execution", view.execution_complete),
        ("reporting", view.reporting_complete),
        ("learning", view.learning_complete),
    ] {
        let mark = if done { "✓".green() } else { "·".dimmed() };
        println!("  {} {}", mark, name);
    }
    println!(
        "  plan approved: {}   cancel requested: {}",
        view.plan_approved, view.cancel_requested
    );
    Ok(())
}

async fn show_results(store: &PathBuf, run_id: &str, report_only: bool) -> Result<()> {
    let engine = build_engine(store);
    let details = engine.get_full(run_id).await?;

    if report_only {
        match &details.reporting {
            Some(reporting) => println!("{}", reporting.report),
            None => println!("{}", "no report generated".dimmed()),
        }
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&details)?);
    Ok(())
}

fn format_status(view: &StatusView) -> String {
    let status = view.status.to_string();
    let colored_status = match view.status {
        RunStatus::Completed => status.green(),
        RunStatus::Failed => status.red(),
        RunStatus::Cancelled => status.yellow(),
        RunStatus::PendingApproval => status.magenta(),
        _ => status.cyan(),
    };
    format!("{} {}", view.run_id.to_string().bold(), colored_status)
}
