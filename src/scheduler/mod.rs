// src/scheduler/mod.rs

//! Client side of the batch scheduler protocol.
//!
//! The controller talks to a [`SchedulerClient`] instead of invoking
//! scheduler tools directly, so tests can swap in a fake scheduler.
//!
//! - [`record`] holds the fixed `RawJobRecord` shape returned by queries.
//! - [`command`] provides `CommandScheduler`, which drives the scheduler's
//!   command-line tools.
//!
//! Implementations are shared through `Arc` by concurrently running
//! workflow controllers and must not cache query results between calls.

pub mod command;
pub mod record;

use std::future::Future;
use std::pin::Pin;

use crate::dag::SubmissionDag;
use crate::errors::Result;
use crate::types::QueueScope;

pub use command::CommandScheduler;
pub use record::{HoldInfo, RawJobRecord, RawStatus, SchedulerJobId};

/// Job label carrying the run id.
pub const RUN_LABEL: &str = "batchdag_run";
/// Job label carrying the workflow node name.
pub const NODE_LABEL: &str = "batchdag_node";
/// Job label carrying the attempt counter.
pub const ATTEMPT_LABEL: &str = "batchdag_attempt";
/// Node label value of the DAG-execution job itself.
pub const DAG_JOB_NODE: &str = "_dag";

pub type SchedulerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Operations the controller needs from the batch scheduler.
///
/// Every call is a remote operation with unspecified latency; callers bound
/// them with timeouts. `submit` never retries internally.
pub trait SchedulerClient: Send + Sync {
    /// Name of the queue this client submits to.
    fn local_queue(&self) -> &str;

    /// Submit a DAG description. Fails with `SubmissionError`.
    fn submit<'a>(&'a self, dag: &'a SubmissionDag) -> SchedulerFuture<'a, SchedulerJobId>;

    /// Current records matching `filter` within `scope`.
    fn query<'a>(
        &'a self,
        scope: QueueScope,
        filter: &'a JobFilter,
    ) -> SchedulerFuture<'a, Vec<RawJobRecord>>;

    /// Remove matching jobs. Jobs no longer in the queue are skipped, not
    /// reported as errors. Returns how many jobs were removed.
    fn cancel<'a>(&'a self, scope: QueueScope, filter: &'a JobFilter)
    -> SchedulerFuture<'a, usize>;

    /// Pause matching idle/running jobs without removing them.
    fn hold<'a>(&'a self, scope: QueueScope, filter: &'a JobFilter) -> SchedulerFuture<'a, usize>;

    /// Resume matching held jobs.
    fn release<'a>(&'a self, scope: QueueScope, filter: &'a JobFilter)
    -> SchedulerFuture<'a, usize>;
}

/// Selects the jobs an operation applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub run_id: Option<String>,
    pub node: Option<String>,
    pub job_id: Option<SchedulerJobId>,
}

impl JobFilter {
    /// All jobs of a run.
    pub fn run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_job(mut self, job_id: SchedulerJobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn matches(&self, record: &RawJobRecord) -> bool {
        self.run_id.as_ref().is_none_or(|r| *r == record.run_id)
            && self.node.as_ref().is_none_or(|n| *n == record.node)
            && self.job_id.as_ref().is_none_or(|j| *j == record.job_id)
    }

    /// Scheduler constraint expression equivalent to [`Self::matches`].
    pub fn to_constraint(&self) -> String {
        let mut clauses = Vec::new();
        if let Some(run) = &self.run_id {
            clauses.push(format!("{RUN_LABEL} == \"{}\"", escape(run)));
        }
        if let Some(node) = &self.node {
            clauses.push(format!("{NODE_LABEL} == \"{}\"", escape(node)));
        }
        if let Some(job) = &self.job_id {
            match job.as_str().split_once('.') {
                Some((cluster, proc_id)) => {
                    clauses.push(format!("ClusterId == {cluster} && ProcId == {proc_id}"))
                }
                None => clauses.push(format!("ClusterId == {}", job.as_str())),
            }
        }
        if clauses.is_empty() {
            "true".to_string()
        } else {
            clauses.join(" && ")
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
