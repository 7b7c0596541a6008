// src/config/mod.rs

//! Workflow definition loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a workflow file from disk.
//! - `validate.rs`: value checks, dependency references and acyclicity.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ControllerSection, DefaultSection, JobConfig, RawConfigFile, SchedulerSection,
    WorkflowSection,
};
pub use validate::validate_config;
