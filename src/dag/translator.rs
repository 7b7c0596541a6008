// src/dag/translator.rs

//! Translation of a [`WorkflowGraph`] into a scheduler DAG description.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;

use tracing::debug;

use crate::dag::graph::{Edge, JobNode, ResourceRequest, WorkflowGraph};
use crate::errors::{BatchDagError, Result};
use crate::scheduler::{ATTEMPT_LABEL, NODE_LABEL, RUN_LABEL};

pub const GROUP_STATUS_PREFIX: &str = "group_status_";
pub const POST_STATUS_SCRIPT: &str = "post_status.sh";
pub const GROUP_PRE_SCRIPT: &str = "group_pre.sh";
pub const CHECK_GROUP_SCRIPT: &str = "check_group_status.sh";

const GROUP_STATUS_MEMORY_MIB: u64 = 64;

/// Name of the synthetic status entry of a sub-DAG group.
pub fn group_status_entry_name(group: &str) -> String {
    format!("{GROUP_STATUS_PREFIX}{group}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A workflow job.
    Payload,
    /// Collects the exit status of a group's members into a status file.
    GroupStatus { group: String, members: Vec<String> },
}

/// What the scheduler should run for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescription {
    pub executable: String,
    pub arguments: Vec<String>,
    pub request: ResourceRequest,
    pub attempt: u32,
    pub labels: BTreeMap<String, String>,
}

/// PRE/POST script invocation attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHook {
    pub script: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionEntry {
    pub name: String,
    pub kind: EntryKind,
    pub job: JobDescription,
    pub pre: Option<ScriptHook>,
    pub post: Option<ScriptHook>,
}

impl SubmissionEntry {
    pub fn is_payload(&self) -> bool {
        matches!(self.kind, EntryKind::Payload)
    }

    pub fn submit_file_name(&self) -> String {
        format!("{}.sub", self.name)
    }
}

/// Scheduler-native description of a (sub)set of a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionDag {
    /// Stem of the DAG file.
    pub name: String,
    pub run_id: String,
    pub submit_dir: PathBuf,
    pub entries: Vec<SubmissionEntry>,
    /// Predecessor/successor constraints between entries.
    pub edges: Vec<Edge>,
}

impl SubmissionDag {
    pub fn file_name(&self) -> String {
        format!("{}.dag", self.name)
    }

    pub fn entry(&self, name: &str) -> Option<&SubmissionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn payload_entries(&self) -> impl Iterator<Item = &SubmissionEntry> {
        self.entries.iter().filter(|e| e.is_payload())
    }

    pub fn group_entries(&self) -> impl Iterator<Item = &SubmissionEntry> {
        self.entries.iter().filter(|e| !e.is_payload())
    }

    /// DAGMan-style text of the whole DAG.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# batchdag DAG {} (run {})", self.name, self.run_id);

        for entry in &self.entries {
            let _ = writeln!(out, "JOB {} {}", entry.name, entry.submit_file_name());
            let vars: Vec<String> = entry
                .job
                .labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{v}\""))
                .collect();
            if !vars.is_empty() {
                let _ = writeln!(out, "VARS {} {}", entry.name, vars.join(" "));
            }
            if let Some(pre) = &entry.pre {
                let _ = writeln!(
                    out,
                    "SCRIPT PRE {} /bin/sh {} {}",
                    entry.name,
                    pre.script,
                    pre.arguments.join(" ")
                );
            }
            if let Some(post) = &entry.post {
                let _ = writeln!(
                    out,
                    "SCRIPT POST {} /bin/sh {} {}",
                    entry.name,
                    post.script,
                    post.arguments.join(" ")
                );
            }
        }

        for edge in &self.edges {
            let _ = writeln!(out, "PARENT {} CHILD {}", edge.parent, edge.child);
        }

        out
    }

    /// Submit description of a single entry.
    pub fn render_submit(&self, entry: &SubmissionEntry) -> String {
        let job = &entry.job;
        let mut out = String::new();
        let _ = writeln!(out, "universe = vanilla");
        let _ = writeln!(out, "executable = {}", job.executable);
        if !job.arguments.is_empty() {
            let args: Vec<String> = job.arguments.iter().map(|a| quote_argument(a)).collect();
            let _ = writeln!(out, "arguments = \"{}\"", args.join(" "));
        }
        let _ = writeln!(out, "request_memory = {}", job.request.memory_mib);
        let _ = writeln!(out, "request_cpus = {}", job.request.cpus);
        if let Some(mins) = job.request.walltime_mins {
            let _ = writeln!(out, "+MaxWallTimeMins = {mins}");
        }
        let _ = writeln!(out, "+{RUN_LABEL} = \"$({RUN_LABEL})\"");
        let _ = writeln!(out, "+{NODE_LABEL} = \"$({NODE_LABEL})\"");
        let _ = writeln!(out, "+{ATTEMPT_LABEL} = $({ATTEMPT_LABEL})");
        let _ = writeln!(out, "output = {}.out", entry.name);
        let _ = writeln!(out, "error = {}.err", entry.name);
        let _ = writeln!(out, "log = {}.log", entry.name);
        let _ = writeln!(out, "queue");
        out
    }
}

/// Scheduler argument-string quoting: `'` groups, doubled quotes are literal.
fn quote_argument(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "''").replace('"', "\"\""))
}

/// Converts workflow graphs into [`SubmissionDag`]s for one run.
#[derive(Debug, Clone)]
pub struct DagTranslator {
    run_id: String,
    submit_dir: PathBuf,
}

impl DagTranslator {
    pub fn new(run_id: impl Into<String>, submit_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            submit_dir: submit_dir.into(),
        }
    }

    /// Translate the whole graph. Cyclic graphs are rejected.
    pub fn translate(&self, graph: &WorkflowGraph) -> Result<SubmissionDag> {
        let all: BTreeSet<String> = graph.nodes().map(|n| n.name.clone()).collect();
        self.translate_subset(graph, &all, &graph.name)
    }

    /// Translate only `names`. Edges are restricted to the subset.
    pub fn translate_subset(
        &self,
        graph: &WorkflowGraph,
        names: &BTreeSet<String>,
        dag_name: &str,
    ) -> Result<SubmissionDag> {
        graph.validate()?;

        if let Some(unknown) = names.iter().find(|n| !graph.contains(n)) {
            return Err(BatchDagError::GraphError(format!(
                "cannot translate unknown job '{unknown}'"
            )));
        }

        let order = graph.topological_order()?;
        let mut entries: Vec<SubmissionEntry> = order
            .iter()
            .filter(|name| names.contains(*name))
            .filter_map(|name| graph.node(name))
            .map(|node| self.payload_entry(node))
            .collect();

        let mut edges: BTreeSet<Edge> = graph
            .edges()
            .iter()
            .filter(|e| names.contains(&e.parent) && names.contains(&e.child))
            .cloned()
            .collect();

        // A group entry is emitted when any member is translated. Its PRE
        // script always aggregates every member's status file.
        for (group, members) in graph.groups() {
            let translated: Vec<&String> = members.iter().filter(|m| names.contains(*m)).collect();
            if translated.is_empty() {
                continue;
            }

            let entry_name = group_status_entry_name(&group);
            let attempt = members
                .iter()
                .filter_map(|m| graph.node(m))
                .map(|n| n.attempt)
                .max()
                .unwrap_or(1);

            for member in translated {
                edges.insert(Edge::new(member.clone(), entry_name.clone()));
                for child in graph.children_of(member) {
                    let external = graph
                        .node(child)
                        .is_some_and(|c| c.group.as_deref() != Some(group.as_str()));
                    if external && names.contains(child) {
                        edges.insert(Edge::new(entry_name.clone(), child));
                    }
                }
            }

            debug!(group = %group, members = members.len(), "adding group status entry");
            entries.push(self.group_entry(&group, &entry_name, members, attempt));
        }

        Ok(SubmissionDag {
            name: dag_name.to_string(),
            run_id: self.run_id.clone(),
            submit_dir: self.submit_dir.clone(),
            entries,
            edges: edges.into_iter().collect(),
        })
    }

    fn labels(&self, node: &str, attempt: u32) -> BTreeMap<String, String> {
        BTreeMap::from([
            (RUN_LABEL.to_string(), self.run_id.clone()),
            (NODE_LABEL.to_string(), node.to_string()),
            (ATTEMPT_LABEL.to_string(), attempt.to_string()),
        ])
    }

    fn payload_entry(&self, node: &JobNode) -> SubmissionEntry {
        SubmissionEntry {
            name: node.name.clone(),
            kind: EntryKind::Payload,
            job: JobDescription {
                executable: "/bin/sh".to_string(),
                arguments: vec!["-c".to_string(), node.cmd.clone()],
                request: node.request.clone(),
                attempt: node.attempt,
                labels: self.labels(&node.name, node.attempt),
            },
            pre: None,
            post: Some(ScriptHook {
                script: POST_STATUS_SCRIPT.to_string(),
                arguments: vec![node.name.clone(), "$RETURN".to_string()],
            }),
        }
    }

    fn group_entry(
        &self,
        group: &str,
        entry_name: &str,
        members: Vec<String>,
        attempt: u32,
    ) -> SubmissionEntry {
        let mut pre_args = vec![entry_name.to_string()];
        pre_args.extend(members.iter().cloned());

        SubmissionEntry {
            name: entry_name.to_string(),
            kind: EntryKind::GroupStatus {
                group: group.to_string(),
                members,
            },
            job: JobDescription {
                executable: CHECK_GROUP_SCRIPT.to_string(),
                arguments: vec![entry_name.to_string()],
                request: ResourceRequest {
                    memory_mib: GROUP_STATUS_MEMORY_MIB,
                    cpus: 1,
                    walltime_mins: None,
                },
                attempt,
                labels: self.labels(entry_name, attempt),
            },
            pre: Some(ScriptHook {
                script: GROUP_PRE_SCRIPT.to_string(),
                arguments: pre_args,
            }),
            post: None,
        }
    }
}
