// src/status/mod.rs

//! Status aggregation and the report model.
//!
//! - [`classify`] maps raw scheduler states and status-file codes to
//!   [`crate::types::JobState`].
//! - [`aggregator`] merges queue records and status files per node.
//! - [`report`] defines the serializable [`WorkflowReport`].

pub mod aggregator;
pub mod classify;
pub mod report;

pub use aggregator::{aggregate, collect, observe, query_records};
pub use classify::{classify, classify_status_code, Classification};
pub use report::{derive_workflow_status, NodeReport, StateCounts, StateSource, WorkflowReport};
