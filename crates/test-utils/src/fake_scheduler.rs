use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use batchdag::dag::SubmissionDag;
use batchdag::errors::BatchDagError;
use batchdag::scheduler::{
    HoldInfo, JobFilter, RawJobRecord, RawStatus, SchedulerClient, SchedulerFuture,
    SchedulerJobId,
};
use batchdag::types::QueueScope;

/// A submitted DAG and the payload entries it has queued so far.
#[derive(Debug)]
struct FakeDag {
    dag: SubmissionDag,
    queued: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_cluster: u64,
    records: Vec<RawJobRecord>,
    dags: Vec<FakeDag>,
    fail_submits: u32,
    fail_queries: u32,
    queries: usize,
}

/// Payload entries `name` waits on, looking through group status entries.
fn payload_parents(dag: &SubmissionDag, name: &str) -> Vec<String> {
    let mut parents = Vec::new();
    let mut seen = BTreeSet::new();
    let mut stack = vec![name.to_string()];
    while let Some(current) = stack.pop() {
        for edge in dag.edges.iter().filter(|e| e.child == current) {
            if !seen.insert(edge.parent.clone()) {
                continue;
            }
            match dag.entry(&edge.parent) {
                Some(entry) if entry.is_payload() => parents.push(edge.parent.clone()),
                _ => stack.push(edge.parent.clone()),
            }
        }
    }
    parents
}

impl FakeState {
    fn succeeded(&self, run_id: &str, node: &str, attempt: u32) -> bool {
        self.records.iter().any(|r| {
            r.run_id == run_id
                && r.node == node
                && r.attempt == attempt
                && matches!(r.status, RawStatus::Exited { code: 0 })
        })
    }

    /// Queue every payload entry whose in-DAG parents all exited 0, the way
    /// DAGMan releases nodes.
    fn release_ready(&mut self, queue: &str) {
        let mut ready = Vec::new();
        for (index, fake) in self.dags.iter().enumerate() {
            for entry in fake.dag.payload_entries() {
                if fake.queued.contains(&entry.name) {
                    continue;
                }
                let parents_done = payload_parents(&fake.dag, &entry.name).iter().all(|p| {
                    fake.dag
                        .entry(p)
                        .is_some_and(|pe| self.succeeded(&fake.dag.run_id, p, pe.job.attempt))
                });
                if parents_done {
                    ready.push((index, entry.clone()));
                }
            }
        }

        for (index, entry) in ready {
            let cluster = self.next_cluster;
            self.next_cluster += 1;
            let fake = &mut self.dags[index];
            fake.queued.insert(entry.name.clone());
            let run_id = fake.dag.run_id.clone();
            self.records.push(RawJobRecord {
                job_id: SchedulerJobId::new(format!("{cluster}.0")),
                queue: queue.to_string(),
                run_id,
                node: entry.name,
                attempt: entry.job.attempt,
                request_memory: Some(entry.job.request.memory_mib),
                status: RawStatus::Idle,
            });
        }
    }
}

/// An in-memory scheduler that:
/// - queues a payload entry as an `Idle` record in the local queue once
///   all of its parents in the same DAG exited 0
/// - lets tests move records through states, evict them or place them in
///   other queues
/// - can fail the next N submissions or queries, and delay every call.
#[derive(Debug, Clone)]
pub struct FakeScheduler {
    local_queue: String,
    delay: Option<Duration>,
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self::with_queue("schedd-a")
    }

    pub fn with_queue(local_queue: &str) -> Self {
        Self {
            local_queue: local_queue.to_string(),
            delay: None,
            state: Arc::new(Mutex::new(FakeState {
                next_cluster: 100,
                ..FakeState::default()
            })),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fail_next_submits(&self, n: u32) {
        self.state().fail_submits = n;
    }

    pub fn fail_next_queries(&self, n: u32) {
        self.state().fail_queries = n;
    }

    pub fn submissions(&self) -> Vec<SubmissionDag> {
        self.state().dags.iter().map(|f| f.dag.clone()).collect()
    }

    pub fn submission_count(&self) -> usize {
        self.state().dags.len()
    }

    pub fn query_count(&self) -> usize {
        self.state().queries
    }

    pub fn records(&self) -> Vec<RawJobRecord> {
        self.state().records.clone()
    }

    /// Latest-attempt record of `node` in `run_id`.
    pub fn record(&self, run_id: &str, node: &str) -> Option<RawJobRecord> {
        self.state()
            .records
            .iter()
            .filter(|r| r.run_id == run_id && r.node == node)
            .max_by_key(|r| r.attempt)
            .cloned()
    }

    fn with_latest<R>(&self, run_id: &str, node: &str, f: impl FnOnce(&mut RawJobRecord) -> R) -> R {
        let mut state = self.state();
        let record = state
            .records
            .iter_mut()
            .filter(|r| r.run_id == run_id && r.node == node)
            .max_by_key(|r| r.attempt)
            .unwrap_or_else(|| panic!("no record for {run_id}/{node}"));
        f(record)
    }

    /// Set the status of the latest attempt of `node`. Children waiting on
    /// it are queued when it exits 0.
    pub fn set_status(&self, run_id: &str, node: &str, status: RawStatus) {
        self.with_latest(run_id, node, |r| r.status = status);
        self.state().release_ready(&self.local_queue);
    }

    pub fn succeed(&self, run_id: &str, node: &str) {
        self.set_status(run_id, node, RawStatus::Exited { code: 0 });
    }

    pub fn fail(&self, run_id: &str, node: &str, code: i32) {
        self.set_status(run_id, node, RawStatus::Exited { code });
    }

    pub fn kill(&self, run_id: &str, node: &str, signal: i32) {
        self.set_status(run_id, node, RawStatus::Signaled { signal });
    }

    pub fn hold_for_memory(&self, run_id: &str, node: &str) {
        self.set_status(
            run_id,
            node,
            RawStatus::Held(HoldInfo::new(34, 0, "Job exceeded its memory request")),
        );
    }

    /// Move the latest attempt of `node` to another queue.
    pub fn move_to_queue(&self, run_id: &str, node: &str, queue: &str) {
        self.with_latest(run_id, node, |r| r.queue = queue.to_string());
    }

    /// Drop every record of `node`, as the scheduler does after completion.
    pub fn evict(&self, run_id: &str, node: &str) {
        self.state()
            .records
            .retain(|r| !(r.run_id == run_id && r.node == node));
    }

    pub fn add_record(&self, record: RawJobRecord) {
        self.state().records.push(record);
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn in_scope(&self, scope: QueueScope, record: &RawJobRecord) -> bool {
        match scope {
            QueueScope::Local => record.queue == self.local_queue,
            QueueScope::Global => true,
        }
    }

    fn transition(
        &self,
        scope: QueueScope,
        filter: &JobFilter,
        applies: impl Fn(&RawStatus) -> bool,
        next: impl Fn(&RawStatus) -> RawStatus,
    ) -> usize {
        let mut state = self.state();
        let mut count = 0;
        for record in state.records.iter_mut() {
            if self.in_scope(scope, record) && filter.matches(record) && applies(&record.status) {
                record.status = next(&record.status);
                count += 1;
            }
        }
        count
    }
}

impl SchedulerClient for FakeScheduler {
    fn local_queue(&self) -> &str {
        &self.local_queue
    }

    fn submit<'a>(&'a self, dag: &'a SubmissionDag) -> SchedulerFuture<'a, SchedulerJobId> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.state();
            if state.fail_submits > 0 {
                state.fail_submits -= 1;
                return Err(BatchDagError::SubmissionError(
                    "scripted submission outage".to_string(),
                ));
            }

            let dag_cluster = state.next_cluster;
            state.next_cluster += 1;

            state.dags.push(FakeDag {
                dag: dag.clone(),
                queued: BTreeSet::new(),
            });
            state.release_ready(&self.local_queue);
            Ok(SchedulerJobId::new(format!("{dag_cluster}.0")))
        })
    }

    fn query<'a>(
        &'a self,
        scope: QueueScope,
        filter: &'a JobFilter,
    ) -> SchedulerFuture<'a, Vec<RawJobRecord>> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.state();
            state.queries += 1;
            if state.fail_queries > 0 {
                state.fail_queries -= 1;
                return Err(BatchDagError::SchedulerUnavailable(
                    "scripted query outage".to_string(),
                ));
            }
            Ok(state
                .records
                .iter()
                .filter(|r| self.in_scope(scope, r) && filter.matches(r))
                .cloned()
                .collect())
        })
    }

    fn cancel<'a>(
        &'a self,
        scope: QueueScope,
        filter: &'a JobFilter,
    ) -> SchedulerFuture<'a, usize> {
        Box::pin(async move {
            self.pause().await;
            Ok(self.transition(scope, filter, RawStatus::in_queue, |_| RawStatus::Removed))
        })
    }

    fn hold<'a>(&'a self, scope: QueueScope, filter: &'a JobFilter) -> SchedulerFuture<'a, usize> {
        Box::pin(async move {
            self.pause().await;
            Ok(self.transition(
                scope,
                filter,
                |s| matches!(s, RawStatus::Idle | RawStatus::Running),
                |_| RawStatus::Held(HoldInfo::new(1, 0, "held by user")),
            ))
        })
    }

    fn release<'a>(
        &'a self,
        scope: QueueScope,
        filter: &'a JobFilter,
    ) -> SchedulerFuture<'a, usize> {
        Box::pin(async move {
            self.pause().await;
            Ok(self.transition(
                scope,
                filter,
                |s| matches!(s, RawStatus::Held(_)),
                |_| RawStatus::Idle,
            ))
        })
    }
}
