// src/engine/mod.rs

//! Workflow run orchestration.
//!
//! The decisions are pure: [`crate::status::aggregate`] builds reports and
//! [`crate::retry::RetryController`] plans retries. [`controller`] is the
//! async shell that talks to the scheduler, writes artifacts and persists
//! each run:
//! - [`session`] holds the per-run context (no process-wide state).
//! - [`run_store`] persists a run as `batchdag.run.toml`.
//! - [`backoff`] computes delays for submission and poll retries.

pub mod backoff;
pub mod controller;
pub mod run_store;
pub mod session;

pub use backoff::{Backoff, MAX_BACKOFF};
pub use controller::{RunOptions, WorkflowController};
pub use run_store::{PersistedRun, RunHandle, RUN_FILE_NAME};
pub use session::ControllerSession;
