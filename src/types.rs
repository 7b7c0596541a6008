use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Memory amounts are always expressed in MiB.
pub type MemoryMib = u64;

/// Canonical per-node job state.
///
/// `Unsubmitted -> Idle -> Running -> {Succeeded | Held | Failed}`. `Held`
/// may go back to `Idle` (released) or to `Failed` (given up). A new attempt
/// starts again from `Idle` with an incremented attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Unsubmitted,
    Idle,
    Running,
    Held,
    Succeeded,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Unsubmitted => "unsubmitted",
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Held => "held",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How the last attempt of a job ended (or why it is paused).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExitSignature {
    /// Normal process exit.
    Code { code: i32 },
    /// Terminated by a signal.
    Signal { signal: i32 },
    /// Held by the scheduler with the given reason.
    Held { reason: String },
}

impl fmt::Display for ExitSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitSignature::Code { code } => write!(f, "exit code {code}"),
            ExitSignature::Signal { signal } => write!(f, "signal {signal}"),
            ExitSignature::Held { reason } => write!(f, "held: {reason}"),
        }
    }
}

/// Why the controller stopped retrying a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GiveUpReason {
    /// `number_of_retries` resubmissions were already spent.
    RetryBudgetExhausted,
    /// The failed attempt already ran at `memory_limit`.
    MemoryCeilingReached,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiveUpReason::RetryBudgetExhausted => f.write_str("retry budget exhausted"),
            GiveUpReason::MemoryCeilingReached => f.write_str("memory ceiling reached"),
        }
    }
}

/// Aggregate status of a whole workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Succeeded,
    Failed,
    Held,
    /// The scheduler could not be reached for too many consecutive polls.
    Unknown,
}

impl WorkflowStatus {
    /// Whether a watch loop should stop polling.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Succeeded | WorkflowStatus::Failed | WorkflowStatus::Unknown
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Held => "held",
            WorkflowStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Which scheduler queues an operation spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueScope {
    /// Only the queue this controller submits to.
    #[default]
    Local,
    /// Every queue visible to the invoking identity.
    Global,
}

impl FromStr for QueueScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(QueueScope::Local),
            "global" => Ok(QueueScope::Global),
            other => Err(format!(
                "invalid queue scope: {other} (expected \"local\" or \"global\")"
            )),
        }
    }
}
