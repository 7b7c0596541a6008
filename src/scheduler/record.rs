// src/scheduler/record.rs

//! Fixed shape of the job records returned by scheduler queries.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::MemoryMib;

/// Hold code used when an operator/user put the job on hold.
pub const HOLD_CODE_USER: i32 = 1;
/// Hold code used by job policy expressions, including signal terminations.
pub const HOLD_CODE_JOB_POLICY: i32 = 3;
/// Hold code (or policy subcode) reported when a job exceeded its memory.
pub const HOLD_CODE_MEMORY_EXCEEDED: i32 = 34;

static SIGNAL_IN_REASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"signal (\d+)").expect("static regex is valid"));

/// Scheduler-assigned job identifier (e.g. `"1234.0"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerJobId(pub String);

impl SchedulerJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchedulerJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SchedulerJobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Why the scheduler put a job on hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInfo {
    pub code: i32,
    pub subcode: i32,
    pub reason: String,
}

impl HoldInfo {
    pub fn new(code: i32, subcode: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            subcode,
            reason: reason.into(),
        }
    }

    /// Held because the job went over its memory request.
    pub fn memory_exceeded(&self) -> bool {
        (self.code == HOLD_CODE_MEMORY_EXCEEDED && self.subcode == 0)
            || (self.code == HOLD_CODE_JOB_POLICY && self.subcode == HOLD_CODE_MEMORY_EXCEEDED)
            || self.reason.to_lowercase().contains("memory")
    }

    /// Signal number when the hold was caused by a signal termination.
    pub fn signal(&self) -> Option<i32> {
        if self.code != HOLD_CODE_JOB_POLICY {
            return None;
        }
        SIGNAL_IN_REASON
            .captures(&self.reason)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    pub fn by_user(&self) -> bool {
        self.code == HOLD_CODE_USER
    }
}

/// Scheduler-native job status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawStatus {
    Idle,
    Running,
    /// Removed from the queue before completing.
    Removed,
    /// Completed with a normal exit code.
    Exited { code: i32 },
    /// Completed by a terminating signal.
    Signaled { signal: i32 },
    Held(HoldInfo),
}

impl RawStatus {
    /// Still occupying the queue (idle, running or held).
    pub fn in_queue(&self) -> bool {
        matches!(self, RawStatus::Idle | RawStatus::Running | RawStatus::Held(_))
    }
}

/// One job as reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawJobRecord {
    pub job_id: SchedulerJobId,
    /// Queue (scheduler daemon) holding the job.
    pub queue: String,
    /// Value of the run label the job was submitted with.
    pub run_id: String,
    /// Workflow node name the job belongs to.
    pub node: String,
    pub attempt: u32,
    pub request_memory: Option<MemoryMib>,
    pub status: RawStatus,
}
