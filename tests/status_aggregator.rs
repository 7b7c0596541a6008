// tests/status_aggregator.rs

mod common;

use std::path::Path;

use batchdag::dag::artifacts::{post_out_path, status_file_path};
use batchdag::engine::ControllerSession;
use batchdag::fs::MockFileSystem;
use batchdag::scheduler::{HoldInfo, RawJobRecord, RawStatus, SchedulerJobId};
use batchdag::status::{aggregate, derive_workflow_status, observe, StateCounts, StateSource};
use batchdag::types::{JobState, WorkflowStatus};

use crate::common::{chain_graph, fast_settings, JobBuilder, WorkflowBuilder, SUBMIT_DIR};

fn session() -> ControllerSession {
    ControllerSession::new("run-1", "chain", SUBMIT_DIR, fast_settings())
}

fn record(node: &str, attempt: u32, status: RawStatus) -> RawJobRecord {
    RawJobRecord {
        job_id: SchedulerJobId::new(format!("{}.0", 10 + attempt)),
        queue: "schedd-a".to_string(),
        run_id: "run-1".to_string(),
        node: node.to_string(),
        attempt,
        request_memory: Some(2048 * attempt as u64),
        status,
    }
}

#[test]
fn queue_records_drive_node_states() {
    let graph = chain_graph();
    let fs = MockFileSystem::new();
    let records = vec![
        record("a", 1, RawStatus::Exited { code: 0 }),
        record("b", 1, RawStatus::Running),
    ];

    let report = aggregate(&graph, &session(), &records, &fs);

    assert_eq!(report.state_of("a"), Some(JobState::Succeeded));
    assert_eq!(report.state_of("b"), Some(JobState::Running));
    assert_eq!(report.state_of("c"), Some(JobState::Unsubmitted));
    assert_eq!(report.node("b").unwrap().source, StateSource::Queue);
    assert_eq!(report.node("c").unwrap().source, StateSource::Controller);
    assert_eq!(report.status, WorkflowStatus::Running);
    assert_eq!(report.counts.total(), 3);
    assert_eq!(report.active_count(), 1);
}

#[test]
fn status_file_is_used_once_the_job_left_the_queue() {
    let graph = chain_graph();
    let fs = MockFileSystem::new();
    let dir = Path::new(SUBMIT_DIR);
    fs.add_file(status_file_path(dir, "a"), "0\n");
    fs.add_file(status_file_path(dir, "b"), "-9\n");
    fs.add_file(
        post_out_path(dir, "b"),
        "2026-01-01T00:00:00Z node=b return=-9\n",
    );

    let report = aggregate(&graph, &session(), &[], &fs);

    let a = report.node("a").unwrap();
    assert_eq!(a.state, JobState::Succeeded);
    assert_eq!(a.source, StateSource::StatusFile);

    let b = report.node("b").unwrap();
    assert_eq!(b.state, JobState::Failed);
    assert!(b.memory_exhausted);
    assert_eq!(
        b.diagnostics.as_deref(),
        Some("2026-01-01T00:00:00Z node=b return=-9")
    );
}

#[test]
fn records_of_older_attempts_and_other_runs_are_ignored() {
    let mut graph = chain_graph();
    let node = graph.node_mut("a").unwrap();
    let request = node.request.clone();
    node.begin_attempt(request);

    let fs = MockFileSystem::new();
    let mut foreign = record("b", 1, RawStatus::Exited { code: 0 });
    foreign.run_id = "run-2".to_string();
    let records = vec![
        record("a", 1, RawStatus::Signaled { signal: 7 }),
        foreign,
    ];

    let report = aggregate(&graph, &session(), &records, &fs);

    let a = report.node("a").unwrap();
    assert_eq!(a.attempt, 2);
    assert_eq!(a.state, JobState::Unsubmitted);
    assert!(!a.memory_exhausted);
    assert_eq!(report.state_of("b"), Some(JobState::Unsubmitted));
}

#[test]
fn live_queue_wins_over_status_file() {
    let graph = chain_graph();
    let fs = MockFileSystem::new();
    fs.add_file(status_file_path(Path::new(SUBMIT_DIR), "a"), "1");
    let records = vec![record(
        "a",
        1,
        RawStatus::Held(HoldInfo::new(34, 0, "memory")),
    )];

    let report = aggregate(&graph, &session(), &records, &fs);
    let a = report.node("a").unwrap();
    assert_eq!(a.state, JobState::Held);
    assert!(a.memory_exhausted);
    assert_eq!(a.job_id, Some(SchedulerJobId::new("11.0")));
    assert_eq!(report.status, WorkflowStatus::Held);
}

#[test]
fn group_status_files_are_reported() {
    let graph = WorkflowBuilder::new("grouped")
        .job("x", JobBuilder::new("echo x").group("g").build())
        .job("y", JobBuilder::new("echo y").group("g").build())
        .build_graph();
    let fs = MockFileSystem::new();
    fs.add_file(
        status_file_path(Path::new(SUBMIT_DIR), "group_status_g"),
        "-7",
    );

    let report = aggregate(&graph, &session(), &[], &fs);
    assert_eq!(report.groups.get("g"), Some(&-7));
}

#[test]
fn observe_updates_only_the_current_attempt() {
    let mut graph = chain_graph();
    let fs = MockFileSystem::new();
    let records = vec![
        record("a", 1, RawStatus::Exited { code: 0 }),
        record("b", 1, RawStatus::Signaled { signal: 7 }),
    ];
    let report = aggregate(&graph, &session(), &records, &fs);

    observe(&mut graph, &report);
    assert_eq!(graph.node("a").unwrap().state, JobState::Succeeded);
    assert_eq!(graph.node("b").unwrap().state, JobState::Failed);
    assert!(graph.node("b").unwrap().has_run());
    // Nothing was known about c: it keeps its own state.
    assert_eq!(graph.node("c").unwrap().state, JobState::Unsubmitted);

    // A newer attempt ignores reports about the older one.
    let node = graph.node_mut("b").unwrap();
    let request = node.request.clone();
    node.begin_attempt(request);
    observe(&mut graph, &report);
    assert_eq!(graph.node("b").unwrap().state, JobState::Unsubmitted);
}

#[test]
fn workflow_status_derivation() {
    let mut counts = StateCounts::default();
    assert_eq!(derive_workflow_status(&counts), WorkflowStatus::Running);

    counts.add(JobState::Succeeded);
    counts.add(JobState::Succeeded);
    assert_eq!(derive_workflow_status(&counts), WorkflowStatus::Succeeded);

    counts.add(JobState::Failed);
    assert_eq!(derive_workflow_status(&counts), WorkflowStatus::Failed);

    counts.add(JobState::Held);
    assert_eq!(derive_workflow_status(&counts), WorkflowStatus::Held);

    counts.add(JobState::Running);
    assert_eq!(derive_workflow_status(&counts), WorkflowStatus::Running);
    assert_eq!(counts.get(JobState::Succeeded), 2);
    assert_eq!(counts.total(), 5);
}
