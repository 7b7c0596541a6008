// tests/controller_fake_scheduler.rs

mod common;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use batchdag::config::ControllerSection;
use batchdag::dag::{Edge, WorkflowGraph};
use batchdag::dag::artifacts::status_file_path;
use batchdag::engine::{run_store, RunOptions, WorkflowController};
use batchdag::errors::BatchDagError;
use batchdag::fs::FileSystem;
use batchdag::scheduler::RawStatus;
use batchdag::status::StateSource;
use batchdag::types::{GiveUpReason, JobState, WorkflowStatus};

use crate::common::{
    chain_graph, controller, fast_settings, init_tracing, options, with_timeout, FakeScheduler,
    JobBuilder, WorkflowBuilder, SUBMIT_DIR,
};

type TestResult = Result<(), Box<dyn Error>>;

fn other_run(run_id: &str, dir: &str) -> RunOptions {
    RunOptions::new(dir)
        .with_run_id(run_id)
        .with_settings(fast_settings())
}

/// Three independent jobs, all queued at once.
fn flat_graph() -> WorkflowGraph {
    WorkflowBuilder::new("flat")
        .job("a", JobBuilder::new("echo a").build())
        .job("b", JobBuilder::new("echo b").build())
        .job("c", JobBuilder::new("echo c").build())
        .build_graph()
}

/// `a -> {b, c} -> d`, doubling from 2048 MiB.
fn diamond_graph() -> WorkflowGraph {
    WorkflowBuilder::new("diamond")
        .default_memory(2048)
        .default_memory_limit(8192)
        .default_retries(3)
        .job("a", JobBuilder::new("echo a").build())
        .job("b", JobBuilder::new("echo b").after(&["a"]).build())
        .job("c", JobBuilder::new("echo c").after(&["a"]).build())
        .job("d", JobBuilder::new("echo d").after(&["b", "c"]).build())
        .build_graph()
}

#[tokio::test]
async fn submit_writes_artifacts_and_queues_the_roots() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, fs) = controller(&fake);

    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    assert_eq!(handle.run_id, "run-1");
    assert_eq!(handle.rescue, 0);
    assert_eq!(fake.submission_count(), 1);
    assert_eq!(fake.records().len(), 1);
    assert!(fake.record("run-1", "b").is_none());
    assert!(fs.is_file(&Path::new(SUBMIT_DIR).join("chain.dag")));
    assert!(fs.is_file(&run_store::run_file_path(Path::new(SUBMIT_DIR))));

    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Running);
    assert_eq!(report.counts.idle, 1);
    assert_eq!(report.counts.unsubmitted, 2);
    assert_eq!(report.node("a").unwrap().source, StateSource::Queue);

    // A child is queued once its parent exits 0.
    fake.succeed("run-1", "a");
    assert_eq!(fake.record("run-1", "b").unwrap().status, RawStatus::Idle);
    assert!(fake.record("run-1", "c").is_none());
    Ok(())
}

#[tokio::test]
async fn generated_run_ids_start_with_the_workflow_name() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);

    let opts = RunOptions::new(SUBMIT_DIR).with_settings(fast_settings());
    let handle = with_timeout(ctl.submit(chain_graph(), opts)).await?;
    assert!(handle.run_id.starts_with("chain_"));

    // The same id cannot be submitted twice.
    let dup = with_timeout(ctl.submit(
        chain_graph(),
        other_run(&handle.run_id, "/submit/dup"),
    ))
    .await;
    assert!(matches!(dup, Err(BatchDagError::ConfigError(_))));
    Ok(())
}

#[tokio::test]
async fn memory_kill_is_resubmitted_with_doubled_request() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    fake.succeed("run-1", "a");
    fake.kill("run-1", "b", 7);
    let report = with_timeout(ctl.poll(&handle)).await?;

    assert_eq!(fake.submission_count(), 2);
    let retry_dag = fake.submissions().pop().unwrap();
    assert_eq!(retry_dag.name, "chain.retry.b.2");
    let entry = retry_dag.entry("b").unwrap();
    assert_eq!(entry.job.attempt, 2);
    assert_eq!(entry.job.request.memory_mib, 4096);
    // The stranded child travels with it.
    let names: Vec<&str> = retry_dag.payload_entries().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
    assert_eq!(retry_dag.entry("c").unwrap().job.attempt, 1);
    assert_eq!(retry_dag.edges, vec![Edge::new("b", "c")]);

    let b = report.node("b").unwrap();
    assert_eq!(b.attempt, 2);
    assert_eq!(b.memory_mib, 4096);
    assert_eq!(b.state, JobState::Idle);
    assert_eq!(report.state_of("a"), Some(JobState::Succeeded));
    assert_eq!(report.state_of("c"), Some(JobState::Unsubmitted));
    assert!(with_timeout(ctl.ledger(&handle)).await?.contains("b", 1));

    // Polling the same failure again does not resubmit.
    let _ = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(fake.submission_count(), 2);

    fake.succeed("run-1", "b");
    fake.succeed("run-1", "c");
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Succeeded);
    assert_eq!(report.node("b").unwrap().attempt, 2);
    Ok(())
}

#[tokio::test]
async fn memory_limit_stops_retries() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let graph = WorkflowBuilder::new("wf")
        .job(
            "A",
            JobBuilder::new("echo A")
                .memory(4096)
                .memory_limit(8192)
                .retries(5)
                .build(),
        )
        .job("B", JobBuilder::new("echo B").build())
        .build_graph();
    let handle = with_timeout(ctl.submit(graph, options("run-1"))).await?;

    fake.kill("run-1", "A", 7);
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.node("A").unwrap().memory_mib, 8192);

    fake.kill("run-1", "A", 7);
    fake.succeed("run-1", "B");
    let report = with_timeout(ctl.poll(&handle)).await?;

    let a = report.node("A").unwrap();
    assert_eq!(a.state, JobState::Failed);
    assert_eq!(a.give_up, Some(GiveUpReason::MemoryCeilingReached));
    assert_eq!(a.attempt, 2);
    // The independent branch is still evaluated.
    assert_eq!(report.state_of("B"), Some(JobState::Succeeded));
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(fake.submission_count(), 2);
    Ok(())
}

#[tokio::test]
async fn held_memory_job_is_replaced_and_removed() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    fake.hold_for_memory("run-1", "a");
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.node("a").unwrap().attempt, 2);

    let old = fake
        .records()
        .into_iter()
        .find(|r| r.node == "a" && r.attempt == 1)
        .unwrap();
    assert_eq!(old.status, RawStatus::Removed);
    let new = fake.record("run-1", "a").unwrap();
    assert_eq!(new.attempt, 2);
    assert_eq!(new.status, RawStatus::Idle);
    assert_eq!(new.request_memory, Some(4096));
    Ok(())
}

#[tokio::test]
async fn ordinary_failure_is_not_retried() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    fake.fail("run-1", "a", 1);
    let report = with_timeout(ctl.poll(&handle)).await?;

    assert_eq!(fake.submission_count(), 1);
    assert_eq!(report.state_of("a"), Some(JobState::Failed));
    assert_eq!(report.status, WorkflowStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn local_cancel_spares_other_queues_and_global_does_not() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(flat_graph(), options("run-1"))).await?;
    let other = with_timeout(ctl.submit(flat_graph(), other_run("run-2", "/submit/other"))).await?;

    fake.move_to_queue("run-1", "c", "schedd-b");

    let removed = with_timeout(ctl.cancel(&handle, false)).await?;
    assert_eq!(removed, 2);
    assert_eq!(fake.record("run-1", "c").unwrap().status, RawStatus::Idle);

    let removed = with_timeout(ctl.cancel(&handle, true)).await?;
    assert_eq!(removed, 1);
    assert_eq!(fake.record("run-1", "c").unwrap().status, RawStatus::Removed);

    // Cancelling again is a no-op, not an error.
    assert_eq!(with_timeout(ctl.cancel(&handle, true)).await?, 0);

    // The other run is untouched.
    for node in ["a", "b", "c"] {
        assert_eq!(fake.record(&other.run_id, node).unwrap().status, RawStatus::Idle);
    }
    Ok(())
}

#[tokio::test]
async fn hold_and_release_the_whole_run() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    assert_eq!(with_timeout(ctl.hold(&handle)).await?, 1);
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Held);
    // User holds are not memory failures.
    assert_eq!(fake.submission_count(), 1);

    assert_eq!(with_timeout(ctl.release(&handle)).await?, 1);
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Running);
    Ok(())
}

#[tokio::test]
async fn submission_outage_is_retried_with_backoff() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);

    fake.fail_next_submits(2);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;
    assert_eq!(handle.run_id, "run-1");
    assert_eq!(fake.submission_count(), 1);
    Ok(())
}

#[tokio::test]
async fn submission_gives_up_after_configured_attempts() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);

    fake.fail_next_submits(3);
    let res = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await;
    assert!(matches!(res, Err(BatchDagError::SubmissionError(_))));
    assert_eq!(fake.submission_count(), 0);

    // Nothing was persisted for the failed run.
    let attached = with_timeout(ctl.attach(Path::new(SUBMIT_DIR))).await;
    assert!(matches!(attached, Err(BatchDagError::RunNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn cyclic_graph_is_never_submitted() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);

    let mut graph = chain_graph();
    graph.add_edge("c", "a");
    let res = with_timeout(ctl.submit(graph, options("run-1"))).await;
    assert!(matches!(res, Err(BatchDagError::GraphError(_))));
    assert_eq!(fake.submission_count(), 0);
    Ok(())
}

#[tokio::test]
async fn repeated_query_failures_report_unknown() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    fake.fail_next_queries(3);
    for _ in 0..2 {
        let res = with_timeout(ctl.poll(&handle)).await;
        assert!(matches!(res, Err(BatchDagError::SchedulerUnavailable(_))));
    }
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Unknown);

    // The scheduler is back: polling recovers.
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Running);
    assert_eq!(fake.query_count(), 4);
    Ok(())
}

#[tokio::test]
async fn slow_scheduler_call_times_out() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, fs) = controller(&fake);
    with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    // Same scheduler state, but every call now takes longer than the
    // one-second call timeout.
    let slow = fake.clone().with_delay(Duration::from_secs(3));
    let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
    let slow_ctl = WorkflowController::new(Arc::new(slow), shared);
    let handle = with_timeout(slow_ctl.attach(Path::new(SUBMIT_DIR))).await?;

    match with_timeout(slow_ctl.poll(&handle)).await {
        Err(BatchDagError::SchedulerUnavailable(msg)) => assert!(msg.contains("timed out")),
        other => panic!("expected SchedulerUnavailable, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_runs_are_processed_independently() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let first = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;
    let second =
        with_timeout(ctl.submit(chain_graph(), other_run("run-2", "/submit/other"))).await?;

    for node in ["a", "b", "c"] {
        fake.succeed("run-1", node);
    }
    fake.succeed("run-2", "a");
    fake.kill("run-2", "b", 9);

    let (r1, r2) = with_timeout(async { tokio::join!(ctl.poll(&first), ctl.poll(&second)) }).await;
    let (r1, r2) = (r1?, r2?);

    assert_eq!(r1.status, WorkflowStatus::Succeeded);
    assert_eq!(r1.run_id, "run-1");
    assert_eq!(r2.status, WorkflowStatus::Running);
    assert_eq!(r2.node("b").unwrap().attempt, 2);

    let submissions = fake.submissions();
    assert_eq!(submissions.len(), 3);
    assert_eq!(submissions[2].run_id, "run-2");
    assert_eq!(
        with_timeout(ctl.graph(&first)).await?.node("b").unwrap().attempt,
        1
    );
    Ok(())
}

#[tokio::test]
async fn attach_resumes_a_persisted_run() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    fake.succeed("run-1", "a");
    fake.kill("run-1", "b", 7);
    with_timeout(ctl.poll(&handle)).await?;

    let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
    let resumed = WorkflowController::new(Arc::new(fake.clone()), shared);
    let attached = with_timeout(resumed.attach(Path::new(SUBMIT_DIR))).await?;
    assert_eq!(attached, handle);

    let graph = with_timeout(resumed.graph(&attached)).await?;
    let b = graph.node("b").unwrap();
    assert_eq!(b.attempt, 2);
    assert_eq!(b.request.memory_mib, 4096);
    assert!(with_timeout(resumed.ledger(&attached)).await?.contains("b", 1));
    assert_eq!(
        with_timeout(resumed.scheduler_settings(&attached)).await?.submit_cmd,
        "condor_submit_dag"
    );

    // The resumed controller does not redo the decision.
    let report = with_timeout(resumed.poll(&attached)).await?;
    assert_eq!(fake.submission_count(), 2);
    assert_eq!(report.node("b").unwrap().state, JobState::Idle);
    Ok(())
}

#[tokio::test]
async fn chain_finishes_after_a_middle_node_is_killed_for_memory() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    fake.succeed("run-1", "a");
    fake.kill("run-1", "b", 7);
    with_timeout(ctl.poll(&handle)).await?;
    // The main DAG never queues c: its parent failed there.
    assert!(fake.record("run-1", "c").is_none());

    fake.succeed("run-1", "b");
    let c = fake.record("run-1", "c").unwrap();
    assert_eq!((c.attempt, c.status), (1, RawStatus::Idle));
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Running);

    fake.succeed("run-1", "c");
    let report = with_timeout(ctl.watch(&handle, std::future::pending())).await?;
    let report = report.unwrap();
    assert_eq!(report.status, WorkflowStatus::Succeeded);
    assert_eq!(report.node("b").unwrap().attempt, 2);
    assert_eq!(report.node("c").unwrap().attempt, 1);

    let names: Vec<String> = fake.submissions().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["chain", "chain.retry.b.2"]);
    Ok(())
}

#[tokio::test]
async fn chain_finishes_after_a_middle_node_is_held_for_memory() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    fake.succeed("run-1", "a");
    fake.hold_for_memory("run-1", "b");
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.node("b").unwrap().attempt, 2);

    let held = fake
        .records()
        .into_iter()
        .find(|r| r.node == "b" && r.attempt == 1)
        .unwrap();
    assert_eq!(held.status, RawStatus::Removed);
    let retry_dag = fake.submissions().pop().unwrap();
    assert!(retry_dag.entry("c").is_some());

    fake.succeed("run-1", "b");
    fake.succeed("run-1", "c");
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Succeeded);
    assert_eq!(fake.submission_count(), 2);
    Ok(())
}

#[tokio::test]
async fn child_with_an_unfinished_second_parent_waits_for_it() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(diamond_graph(), options("run-1"))).await?;

    fake.succeed("run-1", "a");
    fake.kill("run-1", "b", 9);
    with_timeout(ctl.poll(&handle)).await?;

    // c is still running in the main DAG, so d cannot join b's retry.
    let retry_dag = fake.submissions().pop().unwrap();
    assert_eq!(retry_dag.name, "diamond.retry.b.2");
    assert!(retry_dag.entry("d").is_none());

    fake.succeed("run-1", "c");
    fake.succeed("run-1", "b");
    assert!(fake.record("run-1", "d").is_none());
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.state_of("d"), Some(JobState::Idle));

    let resume = fake.submissions().pop().unwrap();
    assert_eq!(resume.name, "diamond.resume.d.1");
    let names: Vec<&str> = resume.payload_entries().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["d"]);

    // Nothing left to launch: further polls submit nothing new.
    with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(fake.submission_count(), 3);

    fake.succeed("run-1", "d");
    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn stranded_child_of_a_given_up_node_fails_the_run() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(diamond_graph(), options("run-1"))).await?;

    fake.succeed("run-1", "a");
    fake.kill("run-1", "b", 9);
    with_timeout(ctl.poll(&handle)).await?;
    fake.fail("run-1", "c", 2);
    fake.succeed("run-1", "b");

    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.state_of("d"), Some(JobState::Unsubmitted));
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(fake.submission_count(), 2);

    // The rescue DAG takes over the waiting child.
    let restarted = with_timeout(ctl.restart(&handle)).await?;
    assert_eq!(restarted.rescue, 1);
    let rescue = fake.submissions().pop().unwrap();
    let names: Vec<&str> = rescue.payload_entries().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["c", "d"]);
    with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(fake.submission_count(), 3);
    Ok(())
}

#[tokio::test]
async fn restart_resubmits_only_what_did_not_succeed() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    fake.succeed("run-1", "a");
    fake.fail("run-1", "b", 1);
    fs.add_file(status_file_path(Path::new(SUBMIT_DIR), "b"), "1");

    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.status, WorkflowStatus::Failed);

    let restarted = with_timeout(ctl.restart(&handle)).await?;
    assert_eq!(restarted.run_id, handle.run_id);
    assert_eq!(restarted.rescue, 1);

    let rescue = fake.submissions().pop().unwrap();
    assert_eq!(rescue.name, "chain.rescue001");
    let names: Vec<&str> = rescue.payload_entries().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
    assert_eq!(rescue.entry("b").unwrap().job.attempt, 2);
    assert_eq!(rescue.entry("c").unwrap().job.attempt, 1);
    assert!(!fs.is_file(&status_file_path(Path::new(SUBMIT_DIR), "b")));
    assert!(fs.is_file(&Path::new(SUBMIT_DIR).join("chain.rescue001.dag")));

    let report = with_timeout(ctl.poll(&handle)).await?;
    assert_eq!(report.state_of("a"), Some(JobState::Succeeded));
    assert_eq!(report.state_of("b"), Some(JobState::Idle));
    assert_eq!(report.node("b").unwrap().attempt, 2);
    Ok(())
}

#[tokio::test]
async fn restart_is_refused_while_running_or_with_a_changed_graph() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    let res = with_timeout(ctl.restart(&handle)).await;
    assert!(matches!(res, Err(BatchDagError::RestartError(_))));

    let changed = WorkflowBuilder::new("chain")
        .default_memory(4096)
        .default_memory_limit(8192)
        .default_retries(3)
        .job("a", JobBuilder::new("echo a").build())
        .job("b", JobBuilder::new("echo b").after(&["a"]).build())
        .job("c", JobBuilder::new("echo c").after(&["b"]).build())
        .build_graph();
    let res = with_timeout(ctl.restart_with(&handle, Some(&changed))).await;
    match res {
        Err(BatchDagError::RestartError(msg)) => assert!(msg.contains("cannot change")),
        other => panic!("expected RestartError, got {other:?}"),
    }
    assert_eq!(fake.submission_count(), 1);
    Ok(())
}

#[tokio::test]
async fn watch_returns_the_final_report() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    for node in ["a", "b", "c"] {
        fake.succeed("run-1", node);
    }
    let report = with_timeout(ctl.watch(&handle, std::future::pending())).await?;
    assert_eq!(report.map(|r| r.status), Some(WorkflowStatus::Succeeded));
    Ok(())
}

#[tokio::test]
async fn watch_stops_on_shutdown() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let slow_polls = ControllerSection {
        poll_interval_secs: 60,
        ..fast_settings()
    };
    let opts = options("run-1").with_settings(slow_polls);
    let handle = with_timeout(ctl.submit(chain_graph(), opts)).await?;

    let report = with_timeout(ctl.watch(&handle, async {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }))
    .await?;
    assert_eq!(report.map(|r| r.status), Some(WorkflowStatus::Running));
    assert_eq!(fake.query_count(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_run_is_reported() -> TestResult {
    init_tracing();
    let fake = FakeScheduler::new();
    let (ctl, _fs) = controller(&fake);
    let handle = with_timeout(ctl.submit(chain_graph(), options("run-1"))).await?;

    let (other_ctl, _) = controller(&fake);
    let res = with_timeout(other_ctl.poll(&handle)).await;
    assert!(matches!(res, Err(BatchDagError::RunNotFound(_))));
    Ok(())
}
