// src/engine/controller.rs

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, ControllerSection, SchedulerSection};
use crate::dag::artifacts::{remove_status_file, write_artifacts};
use crate::dag::translator::group_status_entry_name;
use crate::dag::{SubmissionDag, WorkflowGraph};
use crate::errors::{BatchDagError, Result};
use crate::fs::FileSystem;
use crate::restart::{apply_rescue, check_unchanged, plan_rescue};
use crate::retry::{RetryAction, RetryController, RetryLedger};
use crate::scheduler::{SchedulerClient, SchedulerJobId};
use crate::status::{aggregate, observe, query_records, WorkflowReport};
use crate::types::{JobState, QueueScope, WorkflowStatus};

use super::backoff::Backoff;
use super::run_store::{self, PersistedRun, RunHandle};
use super::session::ControllerSession;

/// How a new run is set up.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Generated from the workflow name and the current time when unset.
    pub run_id: Option<String>,
    pub submit_dir: PathBuf,
    pub settings: ControllerSection,
    /// Recorded with the run so `attach` can rebuild the same client.
    pub scheduler: SchedulerSection,
}

impl RunOptions {
    pub fn new(submit_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: None,
            submit_dir: submit_dir.into(),
            settings: ControllerSection::default(),
            scheduler: SchedulerSection::default(),
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            run_id: None,
            submit_dir: cfg.workflow.effective_submit_dir(),
            settings: cfg.controller.clone(),
            scheduler: cfg.scheduler.clone(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_settings(mut self, settings: ControllerSection) -> Self {
        self.settings = settings;
        self
    }
}

fn generate_run_id(workflow: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{workflow}_{millis}")
}

#[derive(Debug)]
struct RunState {
    session: ControllerSession,
    handle: RunHandle,
    scheduler_settings: SchedulerSection,
    graph: WorkflowGraph,
    ledger: RetryLedger,
    /// Jobs stranded by a retry that still wait for their parents.
    detached: BTreeSet<String>,
}

impl RunState {
    fn persisted(&self) -> PersistedRun {
        PersistedRun {
            detached: self.detached.clone(),
            handle: self.handle.clone(),
            settings: self.session.settings.clone(),
            scheduler: self.scheduler_settings.clone(),
            graph: self.graph.clone(),
            ledger: self.ledger.clone(),
        }
    }

    fn from_persisted(run: PersistedRun) -> Self {
        let session = ControllerSession::new(
            run.handle.run_id.clone(),
            run.handle.workflow.clone(),
            run.handle.submit_dir.clone(),
            run.settings,
        );
        Self {
            session,
            handle: run.handle,
            scheduler_settings: run.scheduler,
            graph: run.graph,
            ledger: run.ledger,
            detached: run.detached,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BulkOp {
    Cancel,
    Hold,
    Release,
}

/// Submits, polls, retries, restarts and cancels workflow runs.
///
/// Each run is owned by one `RunState` behind its own lock, so a run is
/// never mutated concurrently while different runs proceed in parallel
/// over the shared scheduler client.
pub struct WorkflowController<S: SchedulerClient> {
    scheduler: Arc<S>,
    fs: Arc<dyn FileSystem>,
    retry: RetryController,
    runs: Mutex<HashMap<String, Arc<Mutex<RunState>>>>,
}

impl<S: SchedulerClient> fmt::Debug for WorkflowController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowController")
            .field("fs", &self.fs)
            .finish_non_exhaustive()
    }
}

impl<S: SchedulerClient> WorkflowController<S> {
    pub fn new(scheduler: Arc<S>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            scheduler,
            fs,
            retry: RetryController::new(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn scheduler(&self) -> &Arc<S> {
        &self.scheduler
    }

    async fn run(&self, handle: &RunHandle) -> Result<Arc<Mutex<RunState>>> {
        self.runs
            .lock()
            .await
            .get(&handle.run_id)
            .cloned()
            .ok_or_else(|| BatchDagError::RunNotFound(handle.run_id.clone()))
    }

    fn persist(&self, state: &RunState) -> Result<()> {
        run_store::save(self.fs.as_ref(), &state.persisted())
    }

    /// Translate, write and submit a whole workflow.
    pub async fn submit(&self, graph: WorkflowGraph, options: RunOptions) -> Result<RunHandle> {
        graph.validate()?;

        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| generate_run_id(&graph.name));
        if self.runs.lock().await.contains_key(&run_id) {
            return Err(BatchDagError::ConfigError(format!(
                "run id '{run_id}' is already in use"
            )));
        }

        let session = ControllerSession::new(
            run_id.clone(),
            graph.name.clone(),
            options.submit_dir.clone(),
            options.settings.clone(),
        );

        let dag = session.translator().translate(&graph)?;
        for node in graph.nodes() {
            remove_status_file(self.fs.as_ref(), &session.submit_dir, &node.name)?;
        }
        write_artifacts(self.fs.as_ref(), &dag)?;

        let dag_job = self.submit_with_backoff(&session, &dag).await?;
        info!(
            run_id = %run_id,
            workflow = %graph.name,
            dag_job = %dag_job,
            jobs = graph.len(),
            "workflow submitted"
        );

        let handle = RunHandle {
            run_id: run_id.clone(),
            workflow: graph.name.clone(),
            submit_dir: options.submit_dir,
            rescue: 0,
        };
        let state = RunState {
            session,
            handle: handle.clone(),
            scheduler_settings: options.scheduler,
            graph,
            ledger: RetryLedger::new(),
            detached: BTreeSet::new(),
        };
        self.persist(&state)?;

        let mut runs = self.runs.lock().await;
        if runs.contains_key(&run_id) {
            return Err(BatchDagError::ConfigError(format!(
                "run id '{run_id}' is already in use"
            )));
        }
        runs.insert(run_id, Arc::new(Mutex::new(state)));
        Ok(handle)
    }

    /// Load a run persisted in `submit_dir` so it can be polled, cancelled
    /// or restarted by this controller.
    pub async fn attach(&self, submit_dir: &Path) -> Result<RunHandle> {
        let persisted = run_store::load(self.fs.as_ref(), submit_dir)?;
        let handle = persisted.handle.clone();

        let mut runs = self.runs.lock().await;
        if let Some(existing) = runs.get(&handle.run_id) {
            return Ok(existing.lock().await.handle.clone());
        }
        debug!(run_id = %handle.run_id, dir = %submit_dir.display(), "attached to run");
        runs.insert(
            handle.run_id.clone(),
            Arc::new(Mutex::new(RunState::from_persisted(persisted))),
        );
        Ok(handle)
    }

    /// Scheduler settings the run was submitted with.
    pub async fn scheduler_settings(&self, handle: &RunHandle) -> Result<SchedulerSection> {
        let run = self.run(handle).await?;
        let state = run.lock().await;
        Ok(state.scheduler_settings.clone())
    }

    /// Copy of the run's graph as the controller currently knows it.
    pub async fn graph(&self, handle: &RunHandle) -> Result<WorkflowGraph> {
        let run = self.run(handle).await?;
        let state = run.lock().await;
        Ok(state.graph.clone())
    }

    pub async fn ledger(&self, handle: &RunHandle) -> Result<RetryLedger> {
        let run = self.run(handle).await?;
        let state = run.lock().await;
        Ok(state.ledger.clone())
    }

    /// One poll cycle: query, aggregate, react to memory exhaustion.
    ///
    /// A transient scheduler failure is returned as an error until
    /// `max_poll_failures` consecutive polls failed; from then on the
    /// report says `Unknown`.
    pub async fn poll(&self, handle: &RunHandle) -> Result<WorkflowReport> {
        let run = self.run(handle).await?;
        let mut guard = run.lock().await;
        let state = &mut *guard;

        let records = match query_records(self.scheduler.as_ref(), &state.session).await {
            Ok(records) => {
                state.session.reset_poll_failures();
                records
            }
            Err(e) if e.is_transient() => {
                let failures = state.session.record_poll_failure();
                warn!(
                    run_id = %state.session.run_id,
                    failures,
                    error = %e,
                    "scheduler query failed"
                );
                if state.session.scheduler_lost() {
                    let mut report =
                        aggregate(&state.graph, &state.session, &[], self.fs.as_ref());
                    report.status = WorkflowStatus::Unknown;
                    return Ok(report);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let report = aggregate(&state.graph, &state.session, &records, self.fs.as_ref());
        observe(&mut state.graph, &report);

        let actions = self.retry.plan(&state.graph, &report, &mut state.ledger);
        if actions.is_empty() && state.detached.is_empty() {
            self.persist(state)?;
            return Ok(report);
        }

        for action in actions {
            self.execute(state, action).await;
        }
        self.launch_detached(state).await;
        self.persist(state)?;
        Ok(aggregate(
            &state.graph,
            &state.session,
            &records,
            self.fs.as_ref(),
        ))
    }

    async fn execute(&self, state: &mut RunState, action: RetryAction) {
        let previous = state.graph.node(action.node()).cloned();
        if !self.retry.apply(&mut state.graph, &action) {
            return;
        }

        match &action {
            RetryAction::GiveUp {
                node,
                attempt,
                reason,
                ..
            } => {
                warn!(
                    run_id = %state.session.run_id,
                    node = %node,
                    attempt,
                    %reason,
                    "giving up on node"
                );
            }
            RetryAction::Resubmit { node, request, .. } => {
                if let Err(e) = self.resubmit_node(state, node).await {
                    warn!(
                        run_id = %state.session.run_id,
                        node = %node,
                        error = %e,
                        "resubmission failed; retrying on a later poll"
                    );
                    if let (Some(prev), Some(slot)) = (previous, state.graph.node_mut(node)) {
                        *slot = prev;
                    }
                    state.ledger.forget(node, action.attempt());
                    return;
                }
                info!(
                    run_id = %state.session.run_id,
                    node = %node,
                    attempt = action.attempt() + 1,
                    memory_mib = request.memory_mib,
                    "node resubmitted with more memory"
                );
            }
        }

        if let Some(job) = action.held_job() {
            self.remove_held_job(state, job).await;
        }
    }

    /// Submit `node` again together with every descendant its failure
    /// stranded. Descendants that also wait on unfinished jobs elsewhere are
    /// kept in `detached` until those succeed.
    async fn resubmit_node(&self, state: &mut RunState, node: &str) -> Result<()> {
        let attempt = state
            .graph
            .node(node)
            .map(|n| n.attempt)
            .ok_or_else(|| BatchDagError::GraphError(format!("unknown job '{node}'")))?;

        let mut pending = state.detached.clone();
        pending.extend(
            state
                .graph
                .descendants(node)
                .into_iter()
                .filter(|d| {
                    state
                        .graph
                        .node(d)
                        .is_some_and(|n| n.state != JobState::Succeeded)
                }),
        );
        let seeds = BTreeSet::from([node.to_string()]);
        let batch = state.graph.ready_closure(&seeds, &pending);

        let dag_name = format!("{}.retry.{}.{}", state.graph.name, node, attempt);
        self.submit_batch(state, &batch, &dag_name).await?;

        pending.retain(|n| !batch.contains(n));
        state.detached = pending;
        debug!(
            run_id = %state.session.run_id,
            node = %node,
            batch = batch.len(),
            waiting = state.detached.len(),
            "retry DAG carries descendants"
        );
        Ok(())
    }

    /// Submit detached jobs whose parents have all succeeded.
    async fn launch_detached(&self, state: &mut RunState) {
        if state.detached.is_empty() {
            return;
        }
        let batch = state.graph.ready_closure(&BTreeSet::new(), &state.detached);
        let Some(first) = batch.iter().next() else {
            return;
        };
        let attempt = state.graph.node(first).map(|n| n.attempt).unwrap_or(1);
        let dag_name = format!("{}.resume.{}.{}", state.graph.name, first, attempt);

        match self.submit_batch(state, &batch, &dag_name).await {
            Ok(()) => {
                state.detached.retain(|n| !batch.contains(n));
                info!(
                    run_id = %state.session.run_id,
                    dag = %dag_name,
                    jobs = batch.len(),
                    "detached jobs submitted"
                );
            }
            Err(e) => warn!(
                run_id = %state.session.run_id,
                dag = %dag_name,
                error = %e,
                "could not submit detached jobs; retrying on a later poll"
            ),
        }
    }

    /// Translate, write and submit a subset of the graph as its own DAG.
    /// Jobs whose parents already succeeded are marked idle.
    async fn submit_batch(
        &self,
        state: &mut RunState,
        batch: &BTreeSet<String>,
        dag_name: &str,
    ) -> Result<()> {
        let dag = state
            .session
            .translator()
            .translate_subset(&state.graph, batch, dag_name)?;

        let groups: BTreeSet<String> = batch
            .iter()
            .filter_map(|n| state.graph.node(n))
            .filter_map(|n| n.group.as_deref())
            .map(group_status_entry_name)
            .collect();
        for name in batch.iter().chain(&groups) {
            remove_status_file(self.fs.as_ref(), &state.session.submit_dir, name)?;
        }
        write_artifacts(self.fs.as_ref(), &dag)?;
        self.submit_with_backoff(&state.session, &dag).await?;

        let ready: Vec<String> = batch
            .iter()
            .filter(|name| {
                state.graph.parents_of(name).iter().all(|p| {
                    state
                        .graph
                        .node(p)
                        .is_some_and(|n| n.state == JobState::Succeeded)
                })
            })
            .cloned()
            .collect();
        for name in ready {
            if let Some(n) = state.graph.node_mut(&name) {
                n.state = JobState::Idle;
            }
        }
        Ok(())
    }

    async fn remove_held_job(&self, state: &RunState, job: &SchedulerJobId) {
        let filter = state.session.filter().with_job(job.clone());
        let scope = state.session.settings.query_scope;
        match state
            .session
            .bounded("cancel", self.scheduler.cancel(scope, &filter))
            .await
        {
            Ok(count) => debug!(job_id = %job, count, "removed superseded held job"),
            Err(e) => warn!(job_id = %job, error = %e, "could not remove held job"),
        }
    }

    /// Submit with exponential backoff on transient failures.
    async fn submit_with_backoff(
        &self,
        session: &ControllerSession,
        dag: &SubmissionDag,
    ) -> Result<SchedulerJobId> {
        let attempts = session.settings.submit_attempts.max(1);
        let mut backoff = Backoff::new(session.settings.submit_backoff());
        let mut attempt = 1;
        loop {
            match session
                .bounded("submit", self.scheduler.submit(dag))
                .await
            {
                Ok(id) => return Ok(id),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        run_id = %session.run_id,
                        dag = %dag.name,
                        attempt,
                        attempts,
                        ?delay,
                        error = %e,
                        "submission failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn bulk(&self, handle: &RunHandle, op: BulkOp, scope: Option<QueueScope>) -> Result<usize> {
        let run = self.run(handle).await?;
        let state = run.lock().await;
        let scope = scope.unwrap_or(state.session.settings.query_scope);
        let filter = state.session.filter();

        let count = match op {
            BulkOp::Cancel => {
                state
                    .session
                    .bounded("cancel", self.scheduler.cancel(scope, &filter))
                    .await?
            }
            BulkOp::Hold => {
                state
                    .session
                    .bounded("hold", self.scheduler.hold(scope, &filter))
                    .await?
            }
            BulkOp::Release => {
                state
                    .session
                    .bounded("release", self.scheduler.release(scope, &filter))
                    .await?
            }
        };
        info!(run_id = %handle.run_id, ?op, ?scope, count, "bulk scheduler operation");
        Ok(count)
    }

    /// Remove the run's jobs from the local queue, or from every visible
    /// queue when `global` is set. Already finished jobs are skipped.
    pub async fn cancel(&self, handle: &RunHandle, global: bool) -> Result<usize> {
        let scope = if global {
            QueueScope::Global
        } else {
            QueueScope::Local
        };
        self.bulk(handle, BulkOp::Cancel, Some(scope)).await
    }

    pub async fn hold(&self, handle: &RunHandle) -> Result<usize> {
        self.bulk(handle, BulkOp::Hold, None).await
    }

    pub async fn release(&self, handle: &RunHandle) -> Result<usize> {
        self.bulk(handle, BulkOp::Release, None).await
    }

    /// Resubmit everything that did not succeed as a rescue DAG.
    pub async fn restart(&self, handle: &RunHandle) -> Result<RunHandle> {
        self.restart_with(handle, None).await
    }

    /// Like [`Self::restart`], refusing if `supplied` differs from the
    /// graph the run was submitted with.
    pub async fn restart_with(
        &self,
        handle: &RunHandle,
        supplied: Option<&WorkflowGraph>,
    ) -> Result<RunHandle> {
        let run = self.run(handle).await?;
        let mut guard = run.lock().await;
        let state = &mut *guard;

        if let Some(graph) = supplied {
            check_unchanged(&state.graph, graph)?;
        }

        let records = query_records(self.scheduler.as_ref(), &state.session).await?;
        let report = aggregate(&state.graph, &state.session, &records, self.fs.as_ref());
        observe(&mut state.graph, &report);

        let plan = plan_rescue(&state.graph, &report)?;
        apply_rescue(&mut state.graph, &plan);

        let stale = plan
            .requeued
            .iter()
            .cloned()
            .chain(plan.affected_group_entries(&state.graph));
        for name in stale {
            remove_status_file(self.fs.as_ref(), &state.session.submit_dir, &name)?;
        }

        let rescue = state.handle.rescue + 1;
        let dag_name = format!("{}.rescue{:03}", state.graph.name, rescue);
        let dag = state
            .session
            .translator()
            .translate_subset(&state.graph, &plan.requeued, &dag_name)?;
        write_artifacts(self.fs.as_ref(), &dag)?;

        match self.submit_with_backoff(&state.session, &dag).await {
            Ok(dag_job) => {
                state.handle.rescue = rescue;
                state.detached.clear();
                state.session.reset_poll_failures();
                self.persist(state)?;
                info!(
                    run_id = %state.session.run_id,
                    rescue,
                    dag_job = %dag_job,
                    preserved = plan.preserved.len(),
                    requeued = plan.requeued.len(),
                    "rescue DAG submitted"
                );
                Ok(state.handle.clone())
            }
            Err(e) => {
                self.persist(state)?;
                Err(e)
            }
        }
    }

    /// Poll on the configured interval until the run reaches a final status
    /// or `shutdown` resolves. Transient failures back off exponentially.
    ///
    /// Returns the last report seen, or `None` when interrupted before any
    /// poll succeeded.
    pub async fn watch<F>(&self, handle: &RunHandle, shutdown: F) -> Result<Option<WorkflowReport>>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let interval = {
            let run = self.run(handle).await?;
            let state = run.lock().await;
            state.session.settings.poll_interval()
        };
        let mut backoff = Backoff::new(interval);
        let mut last = None;

        loop {
            let delay = match self.poll(handle).await {
                Ok(report) => {
                    backoff.reset();
                    info!(
                        run_id = %handle.run_id,
                        status = %report.status,
                        succeeded = report.counts.succeeded,
                        failed = report.counts.failed,
                        total = report.counts.total(),
                        "workflow status"
                    );
                    if report.status.is_final() {
                        return Ok(Some(report));
                    }
                    last = Some(report);
                    interval
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!(run_id = %handle.run_id, error = %e, ?delay, "poll failed; backing off");
                    delay
                }
                Err(e) => return Err(e),
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!(run_id = %handle.run_id, "watch interrupted");
                    return Ok(last);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
