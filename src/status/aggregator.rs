// src/status/aggregator.rs

//! Merges live queue records and on-disk status files into a
//! [`WorkflowReport`].
//!
//! Live queue state wins. A node without a usable queue record falls back
//! to its `<node>.status.txt`, and failing that to the controller's last
//! known state. The aggregator only reports; retry decisions are taken by
//! [`crate::retry::RetryController`].

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::dag::artifacts::{read_post_diagnostics, read_status_file};
use crate::dag::{group_status_entry_name, JobNode, WorkflowGraph};
use crate::engine::session::ControllerSession;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::scheduler::{RawJobRecord, SchedulerClient};
use crate::status::classify::{classify, classify_status_code};
use crate::status::report::{
    derive_workflow_status, NodeReport, StateCounts, StateSource, WorkflowReport,
};
use crate::types::JobState;

/// Fetch this run's records from the scheduler, bounded by the call timeout.
pub async fn query_records(
    scheduler: &dyn SchedulerClient,
    session: &ControllerSession,
) -> Result<Vec<RawJobRecord>> {
    let filter = session.filter();
    let records = session
        .bounded(
            "query",
            scheduler.query(session.settings.query_scope, &filter),
        )
        .await?;
    trace!(run_id = %session.run_id, records = records.len(), "fetched queue records");
    Ok(records)
}

/// Query the scheduler and build a report in one step.
pub async fn collect(
    scheduler: &dyn SchedulerClient,
    session: &ControllerSession,
    graph: &WorkflowGraph,
    fs: &dyn FileSystem,
) -> Result<WorkflowReport> {
    let records = query_records(scheduler, session).await?;
    Ok(aggregate(graph, session, &records, fs))
}

/// Most recent record of `node` that is not older than its current attempt.
fn current_record<'a>(node: &JobNode, records: &'a [RawJobRecord]) -> Option<&'a RawJobRecord> {
    records
        .iter()
        .filter(|r| r.node == node.name && r.attempt >= node.attempt)
        .max_by(|a, b| {
            a.attempt
                .cmp(&b.attempt)
                .then_with(|| a.status.in_queue().cmp(&b.status.in_queue()))
        })
}

fn report_node(
    node: &JobNode,
    session: &ControllerSession,
    records: &[RawJobRecord],
    fs: &dyn FileSystem,
) -> NodeReport {
    let base = NodeReport {
        state: node.state,
        attempt: node.attempt,
        memory_mib: node.request.memory_mib,
        memory_exhausted: false,
        source: StateSource::Controller,
        job_id: node.job_id.clone(),
        give_up: node.give_up,
        diagnostics: None,
        exit: node.last_exit.clone(),
    };

    if node.give_up.is_some() {
        return NodeReport {
            state: JobState::Failed,
            diagnostics: read_post_diagnostics(fs, &session.submit_dir, &node.name),
            ..base
        };
    }

    if let Some(record) = current_record(node, records) {
        let c = classify(&record.status);
        return NodeReport {
            state: c.state,
            memory_exhausted: c.memory_exhausted,
            source: StateSource::Queue,
            job_id: Some(record.job_id.clone()),
            exit: c.exit.or(base.exit.clone()),
            memory_mib: record.request_memory.unwrap_or(base.memory_mib),
            ..base
        };
    }

    if let Some(code) = read_status_file(fs, &session.submit_dir, &node.name) {
        let c = classify_status_code(code);
        return NodeReport {
            state: c.state,
            memory_exhausted: c.memory_exhausted,
            source: StateSource::StatusFile,
            exit: c.exit,
            diagnostics: read_post_diagnostics(fs, &session.submit_dir, &node.name),
            ..base
        };
    }

    base
}

/// Build the report for `graph` from already fetched records.
pub fn aggregate(
    graph: &WorkflowGraph,
    session: &ControllerSession,
    records: &[RawJobRecord],
    fs: &dyn FileSystem,
) -> WorkflowReport {
    let own: Vec<RawJobRecord> = records
        .iter()
        .filter(|r| r.run_id == session.run_id)
        .cloned()
        .collect();

    let mut counts = StateCounts::default();
    let mut nodes = BTreeMap::new();
    for node in graph.nodes() {
        let report = report_node(node, session, &own, fs);
        counts.add(report.state);
        nodes.insert(node.name.clone(), report);
    }

    let groups: BTreeMap<String, i32> = graph
        .groups()
        .into_keys()
        .filter_map(|group| {
            let code = read_status_file(fs, &session.submit_dir, &group_status_entry_name(&group))?;
            Some((group, code))
        })
        .collect();

    let status = derive_workflow_status(&counts);
    debug!(
        run_id = %session.run_id,
        %status,
        succeeded = counts.succeeded,
        failed = counts.failed,
        held = counts.held,
        "aggregated workflow status"
    );

    WorkflowReport {
        run_id: session.run_id.clone(),
        workflow: graph.name.clone(),
        status,
        counts,
        nodes,
        groups,
    }
}

/// Record observed facts (state, exit, job id) on the graph's nodes.
///
/// Only reports for a node's current attempt are applied, and attempt
/// counters, requests and give-up decisions are left alone.
pub fn observe(graph: &mut WorkflowGraph, report: &WorkflowReport) {
    for node in graph.nodes_mut() {
        let Some(seen) = report.nodes.get(&node.name) else {
            continue;
        };
        if seen.attempt != node.attempt || node.give_up.is_some() {
            continue;
        }
        if seen.source == StateSource::Controller {
            continue;
        }
        node.state = seen.state;
        if seen.exit.is_some() {
            node.last_exit = seen.exit.clone();
        }
        if seen.job_id.is_some() {
            node.job_id = seen.job_id.clone();
        }
    }
}
