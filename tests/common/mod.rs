#![allow(dead_code)]

use std::sync::Arc;

use batchdag::dag::WorkflowGraph;
use batchdag::engine::{RunOptions, WorkflowController};
use batchdag::fs::{FileSystem, MockFileSystem};

pub use batchdag_test_utils::{
    fast_settings, init_tracing, with_timeout, FakeScheduler, JobBuilder, WorkflowBuilder,
};

pub const SUBMIT_DIR: &str = "/submit/wf";

/// Controller over a fake scheduler and an in-memory filesystem.
pub fn controller(
    fake: &FakeScheduler,
) -> (WorkflowController<FakeScheduler>, MockFileSystem) {
    let fs = MockFileSystem::new();
    let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
    (WorkflowController::new(Arc::new(fake.clone()), shared), fs)
}

pub fn options(run_id: &str) -> RunOptions {
    RunOptions::new(SUBMIT_DIR)
        .with_run_id(run_id)
        .with_settings(fast_settings())
}

/// `a -> b -> c`, 2048 MiB each, doubling up to 8192 MiB, 3 retries.
pub fn chain_graph() -> WorkflowGraph {
    WorkflowBuilder::new("chain")
        .default_memory(2048)
        .default_memory_limit(8192)
        .default_retries(3)
        .job("a", JobBuilder::new("echo a").build())
        .job("b", JobBuilder::new("echo b").after(&["a"]).build())
        .job("c", JobBuilder::new("echo c").after(&["b"]).build())
        .build_graph()
}
