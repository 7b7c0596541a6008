// src/dag/artifacts.rs

//! Files written next to a submitted DAG and read back while it runs.
//!
//! Each payload entry's POST script records the job's return value in
//! `<node>.status.txt` and appends a line to `<node>.dag.post.out`. Group
//! status entries aggregate their members' status files into their own.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::dag::translator::{
    SubmissionDag, CHECK_GROUP_SCRIPT, GROUP_PRE_SCRIPT, POST_STATUS_SCRIPT,
};
use crate::errors::Result;
use crate::fs::FileSystem;

const POST_STATUS_SH: &str = r#"#!/bin/sh
# usage: post_status.sh <node> <return value>
node="$1"
ret="$2"
echo "$(date -u +%Y-%m-%dT%H:%M:%SZ) node=$node return=$ret" >> "$node.dag.post.out"
echo "$ret" > "$node.status.txt"
if [ "$ret" -eq 0 ]; then
    exit 0
fi
exit 1
"#;

const GROUP_PRE_SH: &str = r#"#!/bin/sh
# usage: group_pre.sh <group entry> <member>...
entry="$1"
shift
status=0
for member in "$@"; do
    if [ -f "$member.status.txt" ]; then
        code=$(cat "$member.status.txt")
    else
        code=1
    fi
    if [ "$status" -eq 0 ] && [ "$code" -ne 0 ]; then
        status=$code
    fi
done
echo "$status" > "$entry.status.txt"
exit 0
"#;

const CHECK_GROUP_STATUS_SH: &str = r#"#!/bin/sh
# usage: check_group_status.sh <group entry>
if [ ! -f "$1.status.txt" ]; then
    exit 1
fi
code=$(cat "$1.status.txt")
if [ "$code" -lt 0 ]; then
    exit 1
fi
exit "$code"
"#;

pub fn status_file_path(submit_dir: &Path, node: &str) -> PathBuf {
    submit_dir.join(format!("{node}.status.txt"))
}

pub fn post_out_path(submit_dir: &Path, node: &str) -> PathBuf {
    submit_dir.join(format!("{node}.dag.post.out"))
}

/// Write the DAG file, one submit description per entry and the helper
/// scripts. Returns the path of the DAG file.
pub fn write_artifacts(fs: &dyn FileSystem, dag: &SubmissionDag) -> Result<PathBuf> {
    let dir = &dag.submit_dir;

    for entry in &dag.entries {
        fs.write(
            &dir.join(entry.submit_file_name()),
            dag.render_submit(entry).as_bytes(),
        )?;
    }

    for (name, body) in [
        (POST_STATUS_SCRIPT, POST_STATUS_SH),
        (GROUP_PRE_SCRIPT, GROUP_PRE_SH),
        (CHECK_GROUP_SCRIPT, CHECK_GROUP_STATUS_SH),
    ] {
        fs.write(&dir.join(name), body.as_bytes())?;
    }

    let dag_path = dir.join(dag.file_name());
    fs.write(&dag_path, dag.render().as_bytes())?;
    debug!(path = %dag_path.display(), entries = dag.entries.len(), "wrote DAG artifacts");
    Ok(dag_path)
}

/// Return value recorded by the POST script, if any.
///
/// Unparseable content is logged and treated as absent.
pub fn read_status_file(fs: &dyn FileSystem, submit_dir: &Path, node: &str) -> Option<i32> {
    let path = status_file_path(submit_dir, node);
    if !fs.is_file(&path) {
        return None;
    }
    let content = match fs.read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read status file");
            return None;
        }
    };
    match content.trim().parse::<i32>() {
        Ok(code) => Some(code),
        Err(_) => {
            warn!(path = %path.display(), content = %content.trim(), "malformed status file");
            None
        }
    }
}

/// Last non-empty line of the POST script log, used as a diagnostic.
pub fn read_post_diagnostics(fs: &dyn FileSystem, submit_dir: &Path, node: &str) -> Option<String> {
    let path = post_out_path(submit_dir, node);
    if !fs.is_file(&path) {
        return None;
    }
    fs.read_to_string(&path)
        .ok()?
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Drop a stale status file before the node runs again.
pub fn remove_status_file(fs: &dyn FileSystem, submit_dir: &Path, node: &str) -> Result<bool> {
    Ok(fs.remove_file(&status_file_path(submit_dir, node))?)
}
