// src/status/classify.rs

//! Fixed classification table from scheduler states to [`JobState`].
//!
//! | raw status                        | state       | memory flag |
//! |-----------------------------------|-------------|-------------|
//! | idle                              | `Idle`      | no          |
//! | running                           | `Running`   | no          |
//! | removed                           | `Failed`    | no          |
//! | exit code 0                       | `Succeeded` | no          |
//! | exit code != 0                    | `Failed`    | no          |
//! | terminated by any signal          | `Failed`    | yes         |
//! | held, memory exceeded             | `Held`      | yes         |
//! | held by policy after a signal     | `Held`      | yes         |
//! | held for any other reason         | `Held`      | no          |
//!
//! Every signal termination counts as a potential memory exhaustion. The
//! cluster's memory enforcement kills jobs with a signal (canonically 7),
//! and from the outside it cannot be told apart from a crash; a genuine
//! crash eventually exhausts the retry budget.

use crate::scheduler::RawStatus;
use crate::types::{ExitSignature, JobState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: JobState,
    pub memory_exhausted: bool,
    pub exit: Option<ExitSignature>,
}

impl Classification {
    fn new(state: JobState) -> Self {
        Self {
            state,
            memory_exhausted: false,
            exit: None,
        }
    }

    fn with_exit(mut self, exit: ExitSignature) -> Self {
        self.exit = Some(exit);
        self
    }

    fn memory(mut self) -> Self {
        self.memory_exhausted = true;
        self
    }
}

/// Classify a live queue record.
pub fn classify(status: &RawStatus) -> Classification {
    match status {
        RawStatus::Idle => Classification::new(JobState::Idle),
        RawStatus::Running => Classification::new(JobState::Running),
        RawStatus::Removed => Classification::new(JobState::Failed),
        RawStatus::Exited { code: 0 } => {
            Classification::new(JobState::Succeeded).with_exit(ExitSignature::Code { code: 0 })
        }
        RawStatus::Exited { code } => {
            Classification::new(JobState::Failed).with_exit(ExitSignature::Code { code: *code })
        }
        RawStatus::Signaled { signal } => Classification::new(JobState::Failed)
            .with_exit(ExitSignature::Signal { signal: *signal })
            .memory(),
        RawStatus::Held(info) => {
            let held = Classification::new(JobState::Held).with_exit(ExitSignature::Held {
                reason: info.reason.clone(),
            });
            if info.memory_exceeded() || info.signal().is_some() {
                held.memory()
            } else {
                held
            }
        }
    }
}

/// Classify the integer of a `<node>.status.txt` file.
///
/// Negative values are signal terminations (`-signal`).
pub fn classify_status_code(code: i32) -> Classification {
    match code {
        0 => Classification::new(JobState::Succeeded).with_exit(ExitSignature::Code { code }),
        c if c > 0 => Classification::new(JobState::Failed).with_exit(ExitSignature::Code { code }),
        c => Classification::new(JobState::Failed)
            .with_exit(ExitSignature::Signal {
                signal: c.saturating_neg(),
            })
            .memory(),
    }
}
