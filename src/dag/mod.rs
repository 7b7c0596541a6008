// src/dag/mod.rs

//! Workflow graphs and their translation for the scheduler.
//!
//! - [`graph`] holds the job DAG of one workflow and its per-node state.
//! - [`translator`] turns a graph (or part of it) into a [`SubmissionDag`].
//! - [`artifacts`] writes submission files and reads back per-node status
//!   files.

pub mod artifacts;
pub mod graph;
pub mod translator;

pub use graph::{Edge, JobNode, ResourceRequest, RetryPolicy, WorkflowGraph};
pub use translator::{
    group_status_entry_name, DagTranslator, EntryKind, JobDescription, ScriptHook,
    SubmissionDag, SubmissionEntry, GROUP_STATUS_PREFIX,
};
