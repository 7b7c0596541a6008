// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchDagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed or cyclic workflow graph. Fatal, never retried.
    #[error("Graph error: {0}")]
    GraphError(String),

    /// The scheduler rejected a submission or could not be reached.
    #[error("Submission error: {0}")]
    SubmissionError(String),

    /// A restart was refused (configuration change, nothing to rescue, ...).
    #[error("Restart error: {0}")]
    RestartError(String),

    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BatchDagError {
    /// Whether the caller should back off and try the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BatchDagError::SubmissionError(_) | BatchDagError::SchedulerUnavailable(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BatchDagError>;
