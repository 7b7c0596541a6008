// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `batchdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "batchdag",
    version,
    about = "Submit, monitor, retry and restart DAG workflows on a batch scheduler.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BATCHDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Translate a workflow definition and submit it.
    Submit(SubmitArgs),

    /// Poll a run once and print its report.
    Report {
        /// Submit directory of the run.
        submit_dir: PathBuf,

        /// Print the report as TOML instead of a table.
        #[arg(long)]
        toml: bool,
    },

    /// Remove a run's jobs from the scheduler.
    Cancel {
        submit_dir: PathBuf,

        /// Also remove jobs from every other queue visible to you.
        #[arg(long)]
        global: bool,
    },

    /// Resubmit everything that did not succeed as a rescue DAG.
    Restart {
        submit_dir: PathBuf,

        /// Keep polling until the run finishes.
        #[arg(long)]
        wait: bool,
    },

    /// Hold a run's idle and running jobs.
    Hold { submit_dir: PathBuf },

    /// Release a run's held jobs.
    Release { submit_dir: PathBuf },

    /// Poll a run until it finishes (Ctrl-C stops watching).
    Watch { submit_dir: PathBuf },
}

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    /// Path to the workflow definition (TOML).
    #[arg(long, value_name = "PATH", default_value = "Workflow.toml")]
    pub config: PathBuf,

    /// Use this run id instead of a generated one.
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Parse + validate, print the DAG, but submit nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Keep polling until the run finishes.
    #[arg(long)]
    pub wait: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
