// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod restart;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, SubmitArgs};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::config::SchedulerSection;
use crate::dag::{DagTranslator, WorkflowGraph};
use crate::engine::{run_store, RunHandle, RunOptions, WorkflowController};
use crate::fs::{FileSystem, RealFileSystem};
use crate::scheduler::CommandScheduler;
use crate::status::WorkflowReport;

type CliController = WorkflowController<CommandScheduler>;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Submit(submit) => run_submit(submit).await,
        Command::Report { submit_dir, toml } => {
            let (controller, handle) = attach(&submit_dir).await?;
            let report = controller.poll(&handle).await?;
            print_report(&report, toml)
        }
        Command::Cancel { submit_dir, global } => {
            let (controller, handle) = attach(&submit_dir).await?;
            let count = controller.cancel(&handle, global).await?;
            println!("removed {count} job(s) of run {}", handle.run_id);
            Ok(())
        }
        Command::Restart { submit_dir, wait } => {
            let (controller, handle) = attach(&submit_dir).await?;
            let handle = controller.restart(&handle).await?;
            println!(
                "submitted rescue DAG #{} for run {}",
                handle.rescue, handle.run_id
            );
            if wait {
                watch_until_done(&controller, &handle).await?;
            }
            Ok(())
        }
        Command::Hold { submit_dir } => {
            let (controller, handle) = attach(&submit_dir).await?;
            let count = controller.hold(&handle).await?;
            println!("held {count} job(s) of run {}", handle.run_id);
            Ok(())
        }
        Command::Release { submit_dir } => {
            let (controller, handle) = attach(&submit_dir).await?;
            let count = controller.release(&handle).await?;
            println!("released {count} job(s) of run {}", handle.run_id);
            Ok(())
        }
        Command::Watch { submit_dir } => {
            let (controller, handle) = attach(&submit_dir).await?;
            watch_until_done(&controller, &handle).await
        }
    }
}

fn build_controller(settings: SchedulerSection) -> Result<CliController> {
    let scheduler = Arc::new(CommandScheduler::new(settings)?);
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    Ok(WorkflowController::new(scheduler, fs))
}

/// Rebuild a controller for the run persisted in `submit_dir`.
async fn attach(submit_dir: &Path) -> Result<(CliController, RunHandle)> {
    let persisted = run_store::load(&RealFileSystem, submit_dir)?;
    let controller = build_controller(persisted.scheduler)?;
    let handle = controller.attach(submit_dir).await?;
    debug!(run_id = %handle.run_id, "attached to persisted run");
    Ok((controller, handle))
}

async fn run_submit(args: SubmitArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let graph = WorkflowGraph::from_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, &graph)?;
        return Ok(());
    }

    let mut options = RunOptions::from_config(&cfg);
    if let Some(run_id) = args.run_id {
        options = options.with_run_id(run_id);
    }

    let controller = build_controller(cfg.scheduler.clone())?;
    let handle = controller.submit(graph, options).await?;
    println!(
        "submitted run {} ({})",
        handle.run_id,
        handle.submit_dir.display()
    );

    if args.wait {
        watch_until_done(&controller, &handle).await?;
    }
    Ok(())
}

async fn watch_until_done(controller: &CliController, handle: &RunHandle) -> Result<()> {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    match controller.watch(handle, shutdown).await? {
        Some(report) => print_report(&report, false),
        None => {
            info!(run_id = %handle.run_id, "stopped before the first report");
            Ok(())
        }
    }
}

fn print_report(report: &WorkflowReport, as_toml: bool) -> Result<()> {
    if as_toml {
        print!("{}", toml::to_string(report)?);
        return Ok(());
    }

    let c = &report.counts;
    println!(
        "run {} ({}): {}",
        report.run_id, report.workflow, report.status
    );
    println!(
        "  succeeded {}/{}  failed {}  held {}  running {}  idle {}  unsubmitted {}",
        c.succeeded,
        c.total(),
        c.failed,
        c.held,
        c.running,
        c.idle,
        c.unsubmitted
    );
    println!();
    println!(
        "{:<24} {:<12} {:>7} {:>10}  DETAIL",
        "NODE", "STATE", "ATTEMPT", "MEMORY"
    );
    for (name, node) in report.nodes.iter() {
        let mut detail = Vec::new();
        if let Some(exit) = &node.exit {
            detail.push(exit.to_string());
        }
        if let Some(reason) = node.give_up {
            detail.push(format!("gave up: {reason}"));
        }
        if let Some(diag) = &node.diagnostics {
            detail.push(diag.clone());
        }
        println!(
            "{:<24} {:<12} {:>7} {:>10}  {}",
            name,
            node.state.to_string(),
            node.attempt,
            node.memory_mib,
            detail.join("; ")
        );
    }
    for (group, code) in report.groups.iter() {
        println!("group {group}: exit {code}");
    }
    Ok(())
}

/// Dry-run output: jobs, resources and the DAG that would be submitted.
fn print_dry_run(cfg: &ConfigFile, graph: &WorkflowGraph) -> Result<()> {
    println!("batchdag dry-run");
    println!("  workflow = {}", cfg.workflow.name);
    println!(
        "  submit_dir = {}",
        cfg.workflow.effective_submit_dir().display()
    );
    println!();

    println!("jobs ({}):", graph.len());
    for node in graph.nodes() {
        println!("  - {}", node.name);
        println!("      cmd: {}", node.cmd);
        let parents = graph.parents_of(&node.name);
        if !parents.is_empty() {
            println!("      after: {:?}", parents);
        }
        if let Some(group) = &node.group {
            println!("      group: {group}");
        }
        println!(
            "      memory: {} MiB (limit {}, x{}), retries: {}",
            node.request.memory_mib,
            node.retry.memory_limit,
            node.retry.memory_multiplier,
            node.retry.number_of_retries
        );
    }
    println!();

    let dag = DagTranslator::new("dry-run", cfg.workflow.effective_submit_dir()).translate(graph)?;
    print!("{}", dag.render());

    debug!("dry-run complete (nothing submitted)");
    Ok(())
}
