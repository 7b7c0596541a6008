// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::model::ConfigFile;
use crate::dag::translator::group_status_entry_name;
use crate::errors::{BatchDagError, Result};
use crate::scheduler::SchedulerJobId;
use crate::types::{ExitSignature, GiveUpReason, JobState, MemoryMib};

/// Resources requested for one attempt of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub memory_mib: MemoryMib,
    pub cpus: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walltime_mins: Option<u32>,
}

/// Memory-scaling retry policy of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub number_of_retries: u32,
    pub memory_multiplier: f64,
    pub memory_limit: MemoryMib,
}

/// One job of a workflow plus the controller's knowledge about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNode {
    pub name: String,
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub state: JobState,
    /// 1-based attempt counter.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub give_up: Option<GiveUpReason>,
    /// Scheduler id of the job instance backing the current attempt, once seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<SchedulerJobId>,
    /// Request as declared in the workflow definition.
    pub original_request: ResourceRequest,
    /// Request of the current attempt (scaled after memory exhaustion).
    pub request: ResourceRequest,
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<ExitSignature>,
}

impl JobNode {
    pub fn new(
        name: impl Into<String>,
        cmd: impl Into<String>,
        request: ResourceRequest,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            group: None,
            state: JobState::Unsubmitted,
            attempt: 1,
            give_up: None,
            job_id: None,
            original_request: request.clone(),
            request,
            retry,
            last_exit: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Whether the current attempt ever reached the scheduler queue.
    pub fn has_run(&self) -> bool {
        self.job_id.is_some() || self.last_exit.is_some()
    }

    /// Retries already spent (`attempt - 1`).
    pub fn retries_used(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }

    /// Start a fresh attempt with the given request.
    pub fn begin_attempt(&mut self, request: ResourceRequest) {
        self.attempt += 1;
        self.request = request;
        self.state = JobState::Unsubmitted;
        self.last_exit = None;
        self.job_id = None;
        self.give_up = None;
    }

    /// Compare the user-controlled definition, ignoring run-time state.
    fn definition_diff(&self, other: &JobNode) -> Option<String> {
        if self.cmd != other.cmd {
            return Some(format!("command of job '{}' changed", self.name));
        }
        if self.group != other.group {
            return Some(format!("group of job '{}' changed", self.name));
        }
        if self.original_request != other.original_request {
            return Some(format!("resource request of job '{}' changed", self.name));
        }
        if self.retry != other.retry {
            return Some(format!("retry policy of job '{}' changed", self.name));
        }
        None
    }
}

/// Dependency: `parent` must succeed before `child` is eligible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub parent: String,
    pub child: String,
}

impl Edge {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

/// Job DAG of one workflow, owned by the controller processing its run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: String,
    nodes: BTreeMap<String, JobNode>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// Build the graph of a validated workflow definition.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut graph = WorkflowGraph::new(cfg.workflow.name.clone());

        for (name, job) in cfg.job.iter() {
            let request = ResourceRequest {
                memory_mib: job.effective_memory(&cfg.default),
                cpus: job.effective_cpus(&cfg.default),
                walltime_mins: job.effective_walltime_mins(&cfg.default),
            };
            let retry = RetryPolicy {
                number_of_retries: job.effective_number_of_retries(&cfg.default),
                memory_multiplier: job.effective_memory_multiplier(&cfg.default),
                memory_limit: job.effective_memory_limit(&cfg.default),
            };
            let mut node = JobNode::new(name.clone(), job.cmd.clone(), request, retry);
            node.group = job.group.clone();
            graph.add_node(node)?;
        }

        for (name, job) in cfg.job.iter() {
            for dep in job.after.iter() {
                graph.add_edge(dep.clone(), name.clone());
            }
        }

        graph.validate()?;
        Ok(graph)
    }

    pub fn add_node(&mut self, node: JobNode) -> Result<()> {
        if self.nodes.contains_key(&node.name) {
            return Err(BatchDagError::GraphError(format!(
                "duplicate job name '{}'",
                node.name
            )));
        }
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    /// Declare a dependency. Endpoints are checked by [`Self::validate`].
    pub fn add_edge(&mut self, parent: impl Into<String>, child: impl Into<String>) {
        let edge = Edge::new(parent, child);
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    /// Reject empty graphs, dangling or self edges, jobs named like a group
    /// status entry, and cycles.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(BatchDagError::GraphError(format!(
                "workflow '{}' has no jobs",
                self.name
            )));
        }

        for group in self.groups().keys() {
            let entry = group_status_entry_name(group);
            if self.nodes.contains_key(&entry) {
                return Err(BatchDagError::GraphError(format!(
                    "job '{entry}' collides with the status entry of group '{group}'"
                )));
            }
        }

        for edge in &self.edges {
            if edge.parent == edge.child {
                return Err(BatchDagError::GraphError(format!(
                    "job '{}' cannot depend on itself",
                    edge.child
                )));
            }
            for end in [&edge.parent, &edge.child] {
                if !self.nodes.contains_key(end) {
                    return Err(BatchDagError::GraphError(format!(
                        "edge {} -> {} references unknown job '{}'",
                        edge.parent, edge.child, end
                    )));
                }
            }
        }

        check_acyclic(
            self.nodes.keys().map(|k| k.as_str()),
            self.edges
                .iter()
                .map(|e| (e.parent.as_str(), e.child.as_str())),
        )
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&JobNode> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut JobNode> {
        self.nodes.get_mut(name)
    }

    /// Nodes ordered by name.
    pub fn nodes(&self) -> impl Iterator<Item = &JobNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut JobNode> {
        self.nodes.values_mut()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn parents_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.child == name)
            .map(|e| e.parent.as_str())
            .collect()
    }

    pub fn children_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.parent == name)
            .map(|e| e.child.as_str())
            .collect()
    }

    /// Every job reachable from `name` through dependency edges.
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = self.children_of(name);
        while let Some(child) = stack.pop() {
            if seen.insert(child.to_string()) {
                stack.extend(self.children_of(child));
            }
        }
        seen
    }

    /// `seeds` plus every job in `pending` whose parents have all succeeded
    /// or are themselves part of the result.
    ///
    /// Dropping the edges that leave the result is safe for such a set: all
    /// of them point at parents that already succeeded.
    pub fn ready_closure(
        &self,
        seeds: &BTreeSet<String>,
        pending: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        let mut batch = seeds.clone();
        loop {
            let ready: Vec<String> = pending
                .iter()
                .filter(|name| !batch.contains(*name))
                .filter(|name| {
                    self.parents_of(name).iter().all(|p| {
                        batch.contains(*p)
                            || self
                                .node(p)
                                .is_some_and(|n| n.state == JobState::Succeeded)
                    })
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                return batch;
            }
            batch.extend(ready);
        }
    }

    /// Job names in dependency order.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let graph = build_graphmap(
            self.nodes.keys().map(|k| k.as_str()),
            self.edges
                .iter()
                .map(|e| (e.parent.as_str(), e.child.as_str())),
        );
        toposort(&graph, None)
            .map(|order| order.into_iter().map(|s| s.to_string()).collect())
            .map_err(|cycle| {
                BatchDagError::GraphError(format!(
                    "cycle detected in workflow DAG involving job '{}'",
                    cycle.node_id()
                ))
            })
    }

    /// Sub-DAG groups and their member jobs.
    pub fn groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node in self.nodes.values() {
            if let Some(group) = &node.group {
                groups
                    .entry(group.clone())
                    .or_default()
                    .push(node.name.clone());
            }
        }
        groups
    }

    /// First difference between the definitions of two graphs, if any.
    ///
    /// Only what the user declared is compared: names, commands, groups,
    /// declared resource requests, retry policies and edges.
    pub fn definition_diff(&self, other: &WorkflowGraph) -> Option<String> {
        if self.name != other.name {
            return Some(format!(
                "workflow name changed from '{}' to '{}'",
                self.name, other.name
            ));
        }

        let ours: BTreeSet<&String> = self.nodes.keys().collect();
        let theirs: BTreeSet<&String> = other.nodes.keys().collect();
        if ours != theirs {
            return Some("set of jobs changed".to_string());
        }

        for (name, node) in self.nodes.iter() {
            if let Some(other_node) = other.nodes.get(name) {
                if let Some(diff) = node.definition_diff(other_node) {
                    return Some(diff);
                }
            }
        }

        let our_edges: BTreeSet<&Edge> = self.edges.iter().collect();
        let their_edges: BTreeSet<&Edge> = other.edges.iter().collect();
        if our_edges != their_edges {
            return Some("job dependencies changed".to_string());
        }

        None
    }
}

fn build_graphmap<'a>(
    names: impl IntoIterator<Item = &'a str>,
    edges: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> DiGraphMap<&'a str, ()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in names {
        graph.add_node(name);
    }
    for (parent, child) in edges {
        graph.add_edge(parent, child, ());
    }
    graph
}

/// Fail with [`BatchDagError::GraphError`] if the edges contain a cycle.
pub fn check_acyclic<'a>(
    names: impl IntoIterator<Item = &'a str>,
    edges: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<()> {
    let graph = build_graphmap(names, edges);

    match toposort(&graph, None) {
        Ok(order) => {
            debug!(jobs = order.len(), "workflow DAG is acyclic");
            Ok(())
        }
        Err(cycle) => Err(BatchDagError::GraphError(format!(
            "cycle detected in workflow DAG involving job '{}'",
            cycle.node_id()
        ))),
    }
}
