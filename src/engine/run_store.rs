// src/engine/run_store.rs

//! Run state persisted as `<submit_dir>/batchdag.run.toml`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ControllerSection, SchedulerSection};
use crate::dag::WorkflowGraph;
use crate::errors::{BatchDagError, Result};
use crate::fs::FileSystem;
use crate::retry::RetryLedger;

pub const RUN_FILE_NAME: &str = "batchdag.run.toml";

/// Identifies a submitted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub workflow: String,
    pub submit_dir: PathBuf,
    /// Number of rescue DAGs submitted so far.
    #[serde(default)]
    pub rescue: u32,
}

/// Everything needed to pick a run up again from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRun {
    /// Jobs the controller still has to submit itself because their
    /// original DAG can no longer run them.
    #[serde(default)]
    pub detached: BTreeSet<String>,
    pub handle: RunHandle,
    pub settings: ControllerSection,
    pub scheduler: SchedulerSection,
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub ledger: RetryLedger,
}

pub fn run_file_path(submit_dir: &Path) -> PathBuf {
    submit_dir.join(RUN_FILE_NAME)
}

pub fn save(fs: &dyn FileSystem, run: &PersistedRun) -> Result<()> {
    let path = run_file_path(&run.handle.submit_dir);
    let text = toml::to_string(run)?;
    fs.write(&path, text.as_bytes())?;
    debug!(path = %path.display(), run_id = %run.handle.run_id, "saved run state");
    Ok(())
}

pub fn load(fs: &dyn FileSystem, submit_dir: &Path) -> Result<PersistedRun> {
    let path = run_file_path(submit_dir);
    if !fs.is_file(&path) {
        return Err(BatchDagError::RunNotFound(format!(
            "no {} in {}",
            RUN_FILE_NAME,
            submit_dir.display()
        )));
    }
    let text = fs.read_to_string(&path)?;
    let run: PersistedRun = toml::from_str(&text)?;
    Ok(run)
}
