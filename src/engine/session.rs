// src/engine/session.rs

use std::future::Future;
use std::path::PathBuf;

use tracing::warn;

use crate::config::ControllerSection;
use crate::dag::DagTranslator;
use crate::errors::{BatchDagError, Result};
use crate::scheduler::JobFilter;

/// Per-run context handed to every component that works on the run.
///
/// Created when a run is submitted or attached and dropped with it.
#[derive(Debug, Clone)]
pub struct ControllerSession {
    pub run_id: String,
    pub workflow: String,
    pub submit_dir: PathBuf,
    pub settings: ControllerSection,
    poll_failures: u32,
}

impl ControllerSession {
    pub fn new(
        run_id: impl Into<String>,
        workflow: impl Into<String>,
        submit_dir: impl Into<PathBuf>,
        settings: ControllerSection,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workflow: workflow.into(),
            submit_dir: submit_dir.into(),
            settings,
            poll_failures: 0,
        }
    }

    /// Filter selecting every job of this run.
    pub fn filter(&self) -> JobFilter {
        JobFilter::run(self.run_id.clone())
    }

    pub fn translator(&self) -> DagTranslator {
        DagTranslator::new(self.run_id.clone(), self.submit_dir.clone())
    }

    /// Count a failed poll and return the consecutive failure count.
    pub fn record_poll_failure(&mut self) -> u32 {
        self.poll_failures += 1;
        self.poll_failures
    }

    pub fn reset_poll_failures(&mut self) {
        self.poll_failures = 0;
    }

    pub fn poll_failures(&self) -> u32 {
        self.poll_failures
    }

    /// Too many consecutive failed polls to trust anything but `Unknown`.
    pub fn scheduler_lost(&self) -> bool {
        self.poll_failures >= self.settings.max_poll_failures.max(1)
    }

    /// Bound a scheduler call by the configured call timeout. A timeout is
    /// reported as `SchedulerUnavailable`.
    pub async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.settings.call_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(run_id = %self.run_id, call = what, ?limit, "scheduler call timed out");
                Err(BatchDagError::SchedulerUnavailable(format!(
                    "{what} timed out after {}s",
                    limit.as_secs()
                )))
            }
        }
    }
}
