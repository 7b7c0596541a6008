#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use batchdag::config::{
    ConfigFile, ControllerSection, DefaultSection, JobConfig, RawConfigFile, SchedulerSection,
    WorkflowSection,
};
use batchdag::dag::WorkflowGraph;
use batchdag::types::MemoryMib;

/// Builder for workflow definitions to simplify test setup.
pub struct WorkflowBuilder {
    config: RawConfigFile,
}

impl WorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: RawConfigFile {
                workflow: WorkflowSection {
                    name: name.to_string(),
                    submit_dir: None,
                },
                controller: ControllerSection::default(),
                scheduler: SchedulerSection::default(),
                default: DefaultSection::default(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn submit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.workflow.submit_dir = Some(dir.into());
        self
    }

    pub fn controller(mut self, controller: ControllerSection) -> Self {
        self.config.controller = controller;
        self
    }

    pub fn default_memory(mut self, memory: MemoryMib) -> Self {
        self.config.default.memory = Some(memory);
        self
    }

    pub fn default_memory_limit(mut self, limit: MemoryMib) -> Self {
        self.config.default.memory_limit = Some(limit);
        self
    }

    pub fn default_retries(mut self, retries: u32) -> Self {
        self.config.default.number_of_retries = Some(retries);
        self
    }

    pub fn default_multiplier(mut self, multiplier: f64) -> Self {
        self.config.default.memory_multiplier = Some(multiplier);
        self
    }

    pub fn job(mut self, name: &str, job: JobConfig) -> Self {
        self.config.job.insert(name.to_string(), job);
        self
    }

    /// The unvalidated definition, for tests that expect validation errors.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build_config(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    pub fn build_graph(self) -> WorkflowGraph {
        let cfg = self.build_config();
        WorkflowGraph::from_config(&cfg).expect("Failed to build graph from builder")
    }
}

/// Builder for `JobConfig`.
pub struct JobBuilder {
    job: JobConfig,
}

impl JobBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            job: JobConfig {
                cmd: cmd.to_string(),
                after: Vec::new(),
                group: None,
                memory: None,
                cpus: None,
                walltime_mins: None,
                number_of_retries: None,
                memory_multiplier: None,
                memory_limit: None,
            },
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.job.after = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.job.group = Some(group.to_string());
        self
    }

    pub fn memory(mut self, memory: MemoryMib) -> Self {
        self.job.memory = Some(memory);
        self
    }

    pub fn cpus(mut self, cpus: u32) -> Self {
        self.job.cpus = Some(cpus);
        self
    }

    pub fn walltime_mins(mut self, mins: u32) -> Self {
        self.job.walltime_mins = Some(mins);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.job.number_of_retries = Some(retries);
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.job.memory_multiplier = Some(multiplier);
        self
    }

    pub fn memory_limit(mut self, limit: MemoryMib) -> Self {
        self.job.memory_limit = Some(limit);
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

/// Controller settings for tests: no waiting between polls or submission
/// attempts, and short scheduler call timeouts.
pub fn fast_settings() -> ControllerSection {
    ControllerSection {
        poll_interval_secs: 0,
        max_poll_failures: 3,
        call_timeout_secs: 1,
        submit_attempts: 3,
        submit_backoff_secs: 0,
        ..ControllerSection::default()
    }
}
