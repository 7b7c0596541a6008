// src/scheduler/command.rs

//! [`SchedulerClient`] backed by the scheduler's command-line tools.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use crate::config::SchedulerSection;
use crate::dag::SubmissionDag;
use crate::errors::{BatchDagError, Result};
use crate::scheduler::{
    HoldInfo, JobFilter, RawJobRecord, RawStatus, SchedulerClient, SchedulerFuture,
    SchedulerJobId, ATTEMPT_LABEL, DAG_JOB_NODE, NODE_LABEL, RUN_LABEL,
};
use crate::types::QueueScope;

/// Attributes requested from the query tool, in output column order.
const QUERY_ATTRIBUTES: [&str; 14] = [
    "GlobalJobId",
    "ClusterId",
    "ProcId",
    RUN_LABEL,
    NODE_LABEL,
    ATTEMPT_LABEL,
    "RequestMemory",
    "JobStatus",
    "ExitBySignal",
    "ExitCode",
    "ExitSignal",
    "HoldReasonCode",
    "HoldReasonSubCode",
    "HoldReason",
];

const UNDEFINED: &str = "undefined";

struct CommandOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Cancel,
    Hold,
    Release,
}

impl Action {
    fn applies_to(self, status: &RawStatus) -> bool {
        match self {
            Action::Cancel => status.in_queue(),
            Action::Hold => matches!(status, RawStatus::Idle | RawStatus::Running),
            Action::Release => matches!(status, RawStatus::Held(_)),
        }
    }
}

/// Drives `condor_submit_dag`-style tools through `tokio::process`.
#[derive(Debug, Clone)]
pub struct CommandScheduler {
    settings: SchedulerSection,
    submit_regex: Regex,
}

impl CommandScheduler {
    pub fn new(settings: SchedulerSection) -> Result<Self> {
        let submit_regex = Regex::new(r"submitted to cluster (\d+)")
            .map_err(|e| BatchDagError::ConfigError(format!("invalid submit pattern: {e}")))?;
        Ok(Self {
            settings,
            submit_regex,
        })
    }

    pub fn settings(&self) -> &SchedulerSection {
        &self.settings
    }

    /// Run a tool, retrying non-zero exits up to `attempts` times.
    async fn run_command(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        attempts: u32,
    ) -> Result<CommandOutput> {
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            trace!(program, ?args, attempt, "running scheduler command");

            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(dir) = cwd {
                cmd.current_dir(dir);
            }

            let output = cmd.output().await.map_err(|e| {
                BatchDagError::SchedulerUnavailable(format!("failed to run {program}: {e}"))
            })?;

            let out = CommandOutput {
                code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };

            if out.code == 0 || attempt >= attempts {
                return Ok(out);
            }

            warn!(
                program,
                attempt,
                attempts,
                code = out.code,
                stderr = %out.stderr.trim(),
                "scheduler command failed; retrying"
            );
            tokio::time::sleep(Duration::from_secs(self.settings.command_retry_delay_secs)).await;
        }
    }

    fn queue_args(&self, scope: QueueScope) -> Vec<String> {
        match scope {
            QueueScope::Global => vec!["-global".to_string()],
            QueueScope::Local if self.settings.local_queue == "local" => Vec::new(),
            QueueScope::Local => vec!["-name".to_string(), self.settings.local_queue.clone()],
        }
    }

    fn queue_name_args(&self, queue: &str) -> Vec<String> {
        if queue == self.settings.local_queue && queue == "local" {
            Vec::new()
        } else {
            vec!["-name".to_string(), queue.to_string()]
        }
    }

    async fn query_records(
        &self,
        scope: QueueScope,
        filter: &JobFilter,
    ) -> Result<Vec<RawJobRecord>> {
        let mut args = self.queue_args(scope);
        args.push("-constraint".to_string());
        args.push(filter.to_constraint());
        args.push("-af:t".to_string());
        args.extend(QUERY_ATTRIBUTES.iter().map(|a| a.to_string()));

        let out = self
            .run_command(
                &self.settings.query_cmd,
                &args,
                None,
                self.settings.command_retries,
            )
            .await?;
        if out.code != 0 {
            return Err(BatchDagError::SchedulerUnavailable(format!(
                "{} exited with {}: {}",
                self.settings.query_cmd,
                out.code,
                out.stderr.trim()
            )));
        }

        let records: Vec<RawJobRecord> = out
            .stdout
            .lines()
            .filter_map(|line| parse_query_line(line, &self.settings.local_queue))
            .filter(|r| filter.matches(r))
            .collect();
        debug!(count = records.len(), ?scope, "queried scheduler");
        Ok(records)
    }

    async fn apply(&self, action: Action, scope: QueueScope, filter: &JobFilter) -> Result<usize> {
        let records = self.query_records(scope, filter).await?;

        let mut by_queue: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in records.iter().filter(|r| action.applies_to(&r.status)) {
            by_queue
                .entry(record.queue.clone())
                .or_default()
                .push(record.job_id.to_string());
        }

        let program = match action {
            Action::Cancel => &self.settings.cancel_cmd,
            Action::Hold => &self.settings.hold_cmd,
            Action::Release => &self.settings.release_cmd,
        };

        let mut count = 0;
        for (queue, ids) in by_queue {
            let mut args = self.queue_name_args(&queue);
            args.extend(ids.iter().cloned());

            let out = self
                .run_command(program, &args, None, self.settings.command_retries)
                .await?;
            if out.code != 0 {
                return Err(BatchDagError::SchedulerUnavailable(format!(
                    "{program} on queue {queue} exited with {}: {}",
                    out.code,
                    out.stderr.trim()
                )));
            }
            info!(?action, queue = %queue, jobs = ids.len(), "scheduler command applied");
            count += ids.len();
        }
        Ok(count)
    }

    async fn submit_dag(&self, dag: &SubmissionDag) -> Result<SchedulerJobId> {
        // A missing DAG file is reported by the submit tool itself.
        let dag_file = dag.file_name();
        let args = vec![
            "-batch-name".to_string(),
            dag.run_id.clone(),
            "-append".to_string(),
            format!("+{RUN_LABEL}=\"{}\"", dag.run_id),
            "-append".to_string(),
            format!("+{NODE_LABEL}=\"{DAG_JOB_NODE}\""),
            dag_file,
        ];

        // Submissions are never retried here; the controller owns backoff.
        let out = self
            .run_command(&self.settings.submit_cmd, &args, Some(&dag.submit_dir), 1)
            .await
            .map_err(|e| BatchDagError::SubmissionError(e.to_string()))?;

        if out.code != 0 {
            return Err(BatchDagError::SubmissionError(format!(
                "{} exited with {}: {}",
                self.settings.submit_cmd,
                out.code,
                out.stderr.trim()
            )));
        }

        let cluster = self
            .submit_regex
            .captures(&out.stdout)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                BatchDagError::SubmissionError(format!(
                    "could not find cluster id in submit output: {}",
                    out.stdout.trim()
                ))
            })?;

        let id = SchedulerJobId::new(format!("{cluster}.0"));
        info!(run_id = %dag.run_id, job_id = %id, "submitted DAG");
        Ok(id)
    }
}

impl SchedulerClient for CommandScheduler {
    fn local_queue(&self) -> &str {
        &self.settings.local_queue
    }

    fn submit<'a>(&'a self, dag: &'a SubmissionDag) -> SchedulerFuture<'a, SchedulerJobId> {
        Box::pin(self.submit_dag(dag))
    }

    fn query<'a>(
        &'a self,
        scope: QueueScope,
        filter: &'a JobFilter,
    ) -> SchedulerFuture<'a, Vec<RawJobRecord>> {
        Box::pin(self.query_records(scope, filter))
    }

    fn cancel<'a>(
        &'a self,
        scope: QueueScope,
        filter: &'a JobFilter,
    ) -> SchedulerFuture<'a, usize> {
        Box::pin(self.apply(Action::Cancel, scope, filter))
    }

    fn hold<'a>(&'a self, scope: QueueScope, filter: &'a JobFilter) -> SchedulerFuture<'a, usize> {
        Box::pin(self.apply(Action::Hold, scope, filter))
    }

    fn release<'a>(
        &'a self,
        scope: QueueScope,
        filter: &'a JobFilter,
    ) -> SchedulerFuture<'a, usize> {
        Box::pin(self.apply(Action::Release, scope, filter))
    }
}

fn defined(field: &str) -> Option<&str> {
    let field = field.trim();
    if field.is_empty() || field == UNDEFINED {
        None
    } else {
        Some(field)
    }
}

fn parse_int(field: &str) -> Option<i32> {
    defined(field).and_then(|s| s.parse().ok())
}

/// Parse one tab-separated line of query output (see [`QUERY_ATTRIBUTES`]).
///
/// Jobs without run or node labels are not ours and yield `None`.
pub fn parse_query_line(line: &str, local_queue: &str) -> Option<RawJobRecord> {
    let fields: Vec<&str> = line.splitn(QUERY_ATTRIBUTES.len(), '\t').collect();
    if fields.len() < QUERY_ATTRIBUTES.len() - 1 {
        return None;
    }
    let field = |i: usize| fields.get(i).copied().unwrap_or(UNDEFINED);

    let run_id = defined(field(3))?.to_string();
    let node = defined(field(4))?.to_string();

    let cluster = defined(field(1))?;
    let proc_id = defined(field(2)).unwrap_or("0");
    let job_id = SchedulerJobId::new(format!("{cluster}.{proc_id}"));

    let queue = defined(field(0))
        .and_then(|g| g.split('#').next())
        .filter(|q| !q.is_empty())
        .unwrap_or(local_queue)
        .to_string();

    let attempt = defined(field(5))
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    let request_memory = defined(field(6)).and_then(|s| s.parse().ok());

    let status = match parse_int(field(7))? {
        1 | 7 => RawStatus::Idle,
        2 | 6 => RawStatus::Running,
        3 => RawStatus::Removed,
        4 => {
            let by_signal = defined(field(8)).is_some_and(|s| s.eq_ignore_ascii_case("true"));
            if by_signal {
                RawStatus::Signaled {
                    signal: parse_int(field(10)).unwrap_or(0),
                }
            } else {
                RawStatus::Exited {
                    code: parse_int(field(9)).unwrap_or(0),
                }
            }
        }
        5 => RawStatus::Held(HoldInfo::new(
            parse_int(field(11)).unwrap_or(0),
            parse_int(field(12)).unwrap_or(0),
            defined(field(13)).unwrap_or(""),
        )),
        _ => return None,
    };

    Some(RawJobRecord {
        job_id,
        queue,
        run_id,
        node,
        attempt,
        request_memory,
        status,
    })
}
