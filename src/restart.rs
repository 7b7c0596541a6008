// src/restart.rs

//! Rescue planning for a finished or failed run.
//!
//! Succeeded nodes are preserved; everything else is queued again without
//! resetting attempt counters or scaled memory requests, so a restart
//! retries the failure instead of starting over.

use std::collections::BTreeSet;

use tracing::info;

use crate::dag::{group_status_entry_name, Edge, WorkflowGraph};
use crate::errors::{BatchDagError, Result};
use crate::status::WorkflowReport;
use crate::types::JobState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescuePlan {
    /// Already succeeded, excluded from resubmission.
    pub preserved: BTreeSet<String>,
    /// Submitted again by the rescue DAG.
    pub requeued: BTreeSet<String>,
    /// Declared edges between requeued nodes.
    pub edges: Vec<Edge>,
}

impl RescuePlan {
    /// Status entries of groups with at least one requeued member.
    pub fn affected_group_entries(&self, graph: &WorkflowGraph) -> Vec<String> {
        graph
            .groups()
            .into_iter()
            .filter(|(_, members)| members.iter().any(|m| self.requeued.contains(m)))
            .map(|(group, _)| group_status_entry_name(&group))
            .collect()
    }
}

/// Refuse a restart that would change the workflow definition.
pub fn check_unchanged(persisted: &WorkflowGraph, supplied: &WorkflowGraph) -> Result<()> {
    match persisted.definition_diff(supplied) {
        Some(diff) => Err(BatchDagError::RestartError(format!(
            "workflow definition cannot change at restart: {diff}"
        ))),
        None => Ok(()),
    }
}

/// Compute the rescue plan from a fresh report.
pub fn plan_rescue(graph: &WorkflowGraph, report: &WorkflowReport) -> Result<RescuePlan> {
    let active = report.active_count();
    if active > 0 {
        return Err(BatchDagError::RestartError(format!(
            "workflow {} still has {active} job(s) in the queue; cancel it before restarting",
            report.run_id
        )));
    }

    let mut preserved = BTreeSet::new();
    let mut requeued = BTreeSet::new();
    for node in graph.nodes() {
        let state = report.state_of(&node.name).unwrap_or(node.state);
        if state == JobState::Succeeded {
            preserved.insert(node.name.clone());
        } else {
            requeued.insert(node.name.clone());
        }
    }

    if requeued.is_empty() {
        return Err(BatchDagError::RestartError(format!(
            "every job of workflow {} already succeeded; nothing to restart",
            report.run_id
        )));
    }

    let edges = graph
        .edges()
        .iter()
        .filter(|e| requeued.contains(&e.parent) && requeued.contains(&e.child))
        .cloned()
        .collect();

    Ok(RescuePlan {
        preserved,
        requeued,
        edges,
    })
}

/// Move the graph to the state the rescue DAG starts from.
///
/// Requeued nodes that ran start a new attempt with their current (possibly
/// scaled) request; nodes that never ran keep their attempt.
pub fn apply_rescue(graph: &mut WorkflowGraph, plan: &RescuePlan) {
    for node in graph.nodes_mut() {
        if plan.preserved.contains(&node.name) {
            node.state = JobState::Succeeded;
            continue;
        }
        if !plan.requeued.contains(&node.name) {
            continue;
        }
        if node.has_run() || node.give_up.is_some() {
            let request = node.request.clone();
            node.begin_attempt(request);
        } else {
            node.state = JobState::Unsubmitted;
        }
        info!(
            node = %node.name,
            attempt = node.attempt,
            memory_mib = node.request.memory_mib,
            "requeued for rescue"
        );
    }
}
