//! Concurrency management for logreach.
//! Sizes the worker pool used by the relevance pass.

use rayon::ThreadPool;
use tracing::info;

use crate::error::Result;

/// Worker count for a configured value; 0 means about half the cores,
/// leaving room for the writer thread and the store's own I/O.
pub fn resolve_workers(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::cmp::max(1, num_cpus::get() / 2)
}

/// Build a dedicated pool for one pass. A local pool keeps repeated passes
/// and parallel tests independent of the global rayon pool.
pub fn build_worker_pool(configured: usize) -> Result<ThreadPool> {
    let workers = resolve_workers(configured);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("logreach-bfs-{}", i))
        .build()?;

    info!(
        "Initialized worker pool: {} workers (system has {} cores)",
        workers,
        num_cpus::get()
    );
    Ok(pool)
}
