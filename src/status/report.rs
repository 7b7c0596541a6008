// src/status/report.rs

//! Serializable snapshot of a workflow run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scheduler::SchedulerJobId;
use crate::types::{ExitSignature, GiveUpReason, JobState, MemoryMib, WorkflowStatus};

/// Where a node's reported state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSource {
    /// Live scheduler queue.
    Queue,
    /// `<node>.status.txt` left by a finished job.
    StatusFile,
    /// The controller's own record of the node.
    Controller,
}

/// State of one node at poll time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub state: JobState,
    pub attempt: u32,
    pub memory_mib: MemoryMib,
    /// The current attempt ended (or is held) in a way that suggests it ran
    /// out of memory.
    pub memory_exhausted: bool,
    pub source: StateSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<SchedulerJobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub give_up: Option<GiveUpReason>,
    /// Last line of the POST script output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitSignature>,
}

/// Number of nodes per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub unsubmitted: usize,
    pub idle: usize,
    pub running: usize,
    pub held: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn add(&mut self, state: JobState) {
        match state {
            JobState::Unsubmitted => self.unsubmitted += 1,
            JobState::Idle => self.idle += 1,
            JobState::Running => self.running += 1,
            JobState::Held => self.held += 1,
            JobState::Succeeded => self.succeeded += 1,
            JobState::Failed => self.failed += 1,
        }
    }

    pub fn get(&self, state: JobState) -> usize {
        match state {
            JobState::Unsubmitted => self.unsubmitted,
            JobState::Idle => self.idle,
            JobState::Running => self.running,
            JobState::Held => self.held,
            JobState::Succeeded => self.succeeded,
            JobState::Failed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.unsubmitted + self.idle + self.running + self.held + self.succeeded + self.failed
    }
}

/// Overall status from per-state counts.
///
/// Active jobs win over held ones, held over failed: a workflow is only
/// `Failed` once nothing can make progress without a restart.
pub fn derive_workflow_status(counts: &StateCounts) -> WorkflowStatus {
    if counts.total() > 0 && counts.succeeded == counts.total() {
        WorkflowStatus::Succeeded
    } else if counts.idle + counts.running > 0 {
        WorkflowStatus::Running
    } else if counts.held > 0 {
        WorkflowStatus::Held
    } else if counts.failed > 0 {
        WorkflowStatus::Failed
    } else {
        WorkflowStatus::Running
    }
}

/// Point-in-time view of a run. Holds no reference into the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub run_id: String,
    pub workflow: String,
    pub status: WorkflowStatus,
    pub counts: StateCounts,
    pub nodes: BTreeMap<String, NodeReport>,
    /// Aggregated exit code per sub-DAG group, once its status entry ran.
    #[serde(default)]
    pub groups: BTreeMap<String, i32>,
}

impl WorkflowReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.get(name)
    }

    pub fn state_of(&self, name: &str) -> Option<JobState> {
        self.nodes.get(name).map(|n| n.state)
    }

    /// Nodes still occupying the scheduler queue.
    pub fn active_count(&self) -> usize {
        self.counts.idle + self.counts.running + self.counts.held
    }
}
