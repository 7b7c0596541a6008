// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{MemoryMib, QueueScope};

pub const DEFAULT_MEMORY_MIB: MemoryMib = 2048;
pub const DEFAULT_CPUS: u32 = 1;
pub const DEFAULT_NUMBER_OF_RETRIES: u32 = 3;
pub const DEFAULT_MEMORY_MULTIPLIER: f64 = 2.0;

/// Workflow definition as read from a TOML file, before validation.
///
/// ```toml
/// [workflow]
/// name = "ci_hsc"
///
/// [default]
/// memory = 2048
/// memory_multiplier = 2.0
/// memory_limit = 16384
///
/// [job.isr]
/// cmd = "pipetask run isr"
///
/// [job.calibrate]
/// cmd = "pipetask run calibrate"
/// after = ["isr"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfigFile {
    pub workflow: WorkflowSection,

    #[serde(default)]
    pub controller: ControllerSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// All jobs from `[job.<name>]`, keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated workflow definition. Construct through `TryFrom<RawConfigFile>`
/// or [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub workflow: WorkflowSection,
    pub controller: ControllerSection,
    pub scheduler: SchedulerSection,
    pub default: DefaultSection,
    pub job: BTreeMap<String, JobConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            workflow: raw.workflow,
            controller: raw.controller,
            scheduler: raw.scheduler,
            default: raw.default,
            job: raw.job,
        }
    }
}

/// `[workflow]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowSection {
    pub name: String,

    /// Where submission artifacts, status files and run state are written.
    #[serde(default)]
    pub submit_dir: Option<PathBuf>,
}

impl WorkflowSection {
    pub fn effective_submit_dir(&self) -> PathBuf {
        self.submit_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("submit").join(&self.name))
    }
}

/// `[controller]` section: polling and submission behaviour.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ControllerSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Consecutive unavailable polls before the run is reported `unknown`.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,

    /// Upper bound for any single scheduler call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_submit_attempts")]
    pub submit_attempts: u32,

    #[serde(default = "default_submit_backoff_secs")]
    pub submit_backoff_secs: u64,

    #[serde(default)]
    pub query_scope: QueueScope,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_poll_failures() -> u32 {
    5
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_submit_attempts() -> u32 {
    3
}

fn default_submit_backoff_secs() -> u64 {
    5
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_failures: default_max_poll_failures(),
            call_timeout_secs: default_call_timeout_secs(),
            submit_attempts: default_submit_attempts(),
            submit_backoff_secs: default_submit_backoff_secs(),
            query_scope: QueueScope::default(),
        }
    }
}

impl ControllerSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn submit_backoff(&self) -> Duration {
        Duration::from_secs(self.submit_backoff_secs)
    }
}

/// `[scheduler]` section: how the command-line scheduler client is invoked.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchedulerSection {
    #[serde(default = "default_local_queue")]
    pub local_queue: String,

    #[serde(default = "default_submit_cmd")]
    pub submit_cmd: String,

    #[serde(default = "default_query_cmd")]
    pub query_cmd: String,

    #[serde(default = "default_cancel_cmd")]
    pub cancel_cmd: String,

    #[serde(default = "default_hold_cmd")]
    pub hold_cmd: String,

    #[serde(default = "default_release_cmd")]
    pub release_cmd: String,

    /// Attempts per command invocation for transient command failures.
    #[serde(default = "default_command_retries")]
    pub command_retries: u32,

    #[serde(default = "default_command_retry_delay_secs")]
    pub command_retry_delay_secs: u64,
}

fn default_local_queue() -> String {
    "local".to_string()
}

fn default_submit_cmd() -> String {
    "condor_submit_dag".to_string()
}

fn default_query_cmd() -> String {
    "condor_q".to_string()
}

fn default_cancel_cmd() -> String {
    "condor_rm".to_string()
}

fn default_hold_cmd() -> String {
    "condor_hold".to_string()
}

fn default_release_cmd() -> String {
    "condor_release".to_string()
}

fn default_command_retries() -> u32 {
    3
}

fn default_command_retry_delay_secs() -> u64 {
    5
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            local_queue: default_local_queue(),
            submit_cmd: default_submit_cmd(),
            query_cmd: default_query_cmd(),
            cancel_cmd: default_cancel_cmd(),
            hold_cmd: default_hold_cmd(),
            release_cmd: default_release_cmd(),
            command_retries: default_command_retries(),
            command_retry_delay_secs: default_command_retry_delay_secs(),
        }
    }
}

/// `[default]` section: resource and retry defaults for every job.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DefaultSection {
    #[serde(default)]
    pub memory: Option<MemoryMib>,

    #[serde(default)]
    pub cpus: Option<u32>,

    #[serde(default)]
    pub walltime_mins: Option<u32>,

    #[serde(default)]
    pub number_of_retries: Option<u32>,

    #[serde(default)]
    pub memory_multiplier: Option<f64>,

    /// Upper bound for scaled memory requests. When unset, a job's memory
    /// request never grows.
    #[serde(default)]
    pub memory_limit: Option<MemoryMib>,
}

/// `[job.<name>]` section. Unset resource/retry fields fall back to
/// `[default]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobConfig {
    pub cmd: String,

    /// Jobs that must succeed before this one becomes eligible.
    #[serde(default)]
    pub after: Vec<String>,

    /// Sub-DAG group this job belongs to.
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub memory: Option<MemoryMib>,

    #[serde(default)]
    pub cpus: Option<u32>,

    #[serde(default)]
    pub walltime_mins: Option<u32>,

    #[serde(default)]
    pub number_of_retries: Option<u32>,

    #[serde(default)]
    pub memory_multiplier: Option<f64>,

    #[serde(default)]
    pub memory_limit: Option<MemoryMib>,
}

impl JobConfig {
    pub fn effective_memory(&self, defaults: &DefaultSection) -> MemoryMib {
        self.memory
            .or(defaults.memory)
            .unwrap_or(DEFAULT_MEMORY_MIB)
    }

    pub fn effective_cpus(&self, defaults: &DefaultSection) -> u32 {
        self.cpus.or(defaults.cpus).unwrap_or(DEFAULT_CPUS)
    }

    pub fn effective_walltime_mins(&self, defaults: &DefaultSection) -> Option<u32> {
        self.walltime_mins.or(defaults.walltime_mins)
    }

    pub fn effective_number_of_retries(&self, defaults: &DefaultSection) -> u32 {
        self.number_of_retries
            .or(defaults.number_of_retries)
            .unwrap_or(DEFAULT_NUMBER_OF_RETRIES)
    }

    pub fn effective_memory_multiplier(&self, defaults: &DefaultSection) -> f64 {
        self.memory_multiplier
            .or(defaults.memory_multiplier)
            .unwrap_or(DEFAULT_MEMORY_MULTIPLIER)
    }

    /// Falls back to the job's own memory request, i.e. no growth.
    pub fn effective_memory_limit(&self, defaults: &DefaultSection) -> MemoryMib {
        self.memory_limit
            .or(defaults.memory_limit)
            .unwrap_or_else(|| self.effective_memory(defaults))
    }
}
