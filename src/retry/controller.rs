// src/retry/controller.rs

use tracing::{debug, info};

use crate::dag::{ResourceRequest, RetryPolicy, WorkflowGraph};
use crate::retry::ledger::RetryLedger;
use crate::scheduler::SchedulerJobId;
use crate::status::WorkflowReport;
use crate::types::{GiveUpReason, JobState, MemoryMib};

/// Memory request for the next attempt, or `None` when the current request
/// already sits at the ceiling.
///
/// The result is `floor(current * multiplier)` clamped to
/// `[current + 1, memory_limit]`, so requests strictly grow until they hit
/// the limit.
pub fn next_memory_request(current: MemoryMib, policy: &RetryPolicy) -> Option<MemoryMib> {
    if current >= policy.memory_limit {
        return None;
    }
    let scaled = (current as f64 * policy.memory_multiplier).floor();
    let next = if scaled.is_finite() && scaled < policy.memory_limit as f64 {
        scaled as MemoryMib
    } else {
        policy.memory_limit
    };
    Some(next.max(current + 1).min(policy.memory_limit))
}

/// Decision for one failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    /// Run `node` again as attempt `attempt + 1` with `request`.
    Resubmit {
        node: String,
        attempt: u32,
        request: ResourceRequest,
        /// Held job of the failed attempt, removed once the new one is in.
        held_job: Option<SchedulerJobId>,
    },
    /// Stop retrying `node`; it stays `Failed`.
    GiveUp {
        node: String,
        attempt: u32,
        reason: GiveUpReason,
        held_job: Option<SchedulerJobId>,
    },
}

impl RetryAction {
    pub fn node(&self) -> &str {
        match self {
            RetryAction::Resubmit { node, .. } | RetryAction::GiveUp { node, .. } => node,
        }
    }

    /// The attempt whose failure triggered the action.
    pub fn attempt(&self) -> u32 {
        match self {
            RetryAction::Resubmit { attempt, .. } | RetryAction::GiveUp { attempt, .. } => {
                *attempt
            }
        }
    }

    pub fn held_job(&self) -> Option<&SchedulerJobId> {
        match self {
            RetryAction::Resubmit { held_job, .. } | RetryAction::GiveUp { held_job, .. } => {
                held_job.as_ref()
            }
        }
    }
}

/// Per-node memory-scaling retry state machine.
///
/// Planning is pure: [`Self::plan`] reads a report and records decisions in
/// the ledger, [`Self::apply`] moves the graph forward. Submitting the new
/// attempt is left to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController;

impl RetryController {
    pub fn new() -> Self {
        Self
    }

    /// Decide what to do about every memory-exhausted node in `report`.
    ///
    /// Each `(node, attempt)` is decided at most once; feeding the same
    /// report again yields no actions.
    pub fn plan(
        &self,
        graph: &WorkflowGraph,
        report: &WorkflowReport,
        ledger: &mut RetryLedger,
    ) -> Vec<RetryAction> {
        let mut actions = Vec::new();

        for (name, seen) in report.nodes.iter() {
            let Some(node) = graph.node(name) else {
                continue;
            };
            if node.give_up.is_some() || seen.attempt != node.attempt {
                continue;
            }
            if !seen.memory_exhausted || !matches!(seen.state, JobState::Held | JobState::Failed) {
                continue;
            }
            if !ledger.record(name, node.attempt) {
                debug!(node = %name, attempt = node.attempt, "failure already handled");
                continue;
            }

            let held_job = match seen.state {
                JobState::Held => seen.job_id.clone(),
                _ => None,
            };

            let action = if node.retries_used() >= node.retry.number_of_retries {
                RetryAction::GiveUp {
                    node: name.clone(),
                    attempt: node.attempt,
                    reason: GiveUpReason::RetryBudgetExhausted,
                    held_job,
                }
            } else {
                match next_memory_request(node.request.memory_mib, &node.retry) {
                    Some(memory_mib) => RetryAction::Resubmit {
                        node: name.clone(),
                        attempt: node.attempt,
                        request: ResourceRequest {
                            memory_mib,
                            ..node.request.clone()
                        },
                        held_job,
                    },
                    None => RetryAction::GiveUp {
                        node: name.clone(),
                        attempt: node.attempt,
                        reason: GiveUpReason::MemoryCeilingReached,
                        held_job,
                    },
                }
            };

            info!(
                node = %name,
                attempt = node.attempt,
                memory_mib = node.request.memory_mib,
                ?action,
                "memory exhaustion handled"
            );
            actions.push(action);
        }

        actions
    }

    /// Apply `action` to the graph. Returns `false` when the node moved on
    /// since the action was planned.
    pub fn apply(&self, graph: &mut WorkflowGraph, action: &RetryAction) -> bool {
        let Some(node) = graph.node_mut(action.node()) else {
            return false;
        };
        if node.attempt != action.attempt() || node.give_up.is_some() {
            return false;
        }

        match action {
            RetryAction::Resubmit { request, .. } => {
                node.begin_attempt(request.clone());
            }
            RetryAction::GiveUp { reason, .. } => {
                node.give_up = Some(*reason);
                node.state = JobState::Failed;
            }
        }
        true
    }
}
