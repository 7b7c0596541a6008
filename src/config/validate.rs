// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::graph::check_acyclic;
use crate::dag::translator::group_status_entry_name;
use crate::errors::{BatchDagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = BatchDagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Run every check on a raw workflow definition.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_workflow_section(cfg)?;
    validate_controller_section(cfg)?;
    validate_job_resources(cfg)?;
    validate_job_dependencies(cfg)?;
    validate_groups(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(BatchDagError::ConfigError(
            "workflow must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_workflow_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.workflow.name.trim().is_empty() {
        return Err(BatchDagError::ConfigError(
            "[workflow].name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_controller_section(cfg: &RawConfigFile) -> Result<()> {
    let c = &cfg.controller;
    if c.poll_interval_secs == 0 {
        return Err(BatchDagError::ConfigError(
            "[controller].poll_interval_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if c.submit_attempts == 0 {
        return Err(BatchDagError::ConfigError(
            "[controller].submit_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if c.call_timeout_secs == 0 {
        return Err(BatchDagError::ConfigError(
            "[controller].call_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.scheduler.command_retries == 0 {
        return Err(BatchDagError::ConfigError(
            "[scheduler].command_retries must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_job_resources(cfg: &RawConfigFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        let memory = job.effective_memory(&cfg.default);
        if memory == 0 {
            return Err(BatchDagError::ConfigError(format!(
                "job '{name}' must request a positive amount of memory"
            )));
        }

        let multiplier = job.effective_memory_multiplier(&cfg.default);
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(BatchDagError::ConfigError(format!(
                "job '{name}': memory_multiplier must be > 1.0 (got {multiplier})"
            )));
        }

        let limit = job.effective_memory_limit(&cfg.default);
        if memory > limit {
            return Err(BatchDagError::ConfigError(format!(
                "job '{name}': memory request {memory} MiB exceeds memory_limit {limit} MiB"
            )));
        }

        if job.effective_cpus(&cfg.default) == 0 {
            return Err(BatchDagError::ConfigError(format!(
                "job '{name}' must request at least one cpu"
            )));
        }
    }
    Ok(())
}

fn validate_job_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        for dep in job.after.iter() {
            if dep == name {
                return Err(BatchDagError::GraphError(format!(
                    "job '{name}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.job.contains_key(dep) {
                return Err(BatchDagError::GraphError(format!(
                    "job '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_groups(cfg: &RawConfigFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        if let Some(group) = &job.group {
            if group.trim().is_empty() {
                return Err(BatchDagError::ConfigError(format!(
                    "job '{name}' has an empty group name"
                )));
            }
            let entry = group_status_entry_name(group);
            if cfg.job.contains_key(&entry) {
                return Err(BatchDagError::ConfigError(format!(
                    "job '{entry}' collides with the status entry of group '{group}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let edges = cfg.job.iter().flat_map(|(name, job)| {
        job.after
            .iter()
            .map(move |dep| (dep.as_str(), name.as_str()))
    });

    check_acyclic(cfg.job.keys().map(|k| k.as_str()), edges)
}
