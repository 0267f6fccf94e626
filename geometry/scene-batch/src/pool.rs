//! Bounded worker pool for per-frame preparation.
use rayon::prelude::*;

use crate::Result;

/// Upper bound on the number of worker threads.
pub const MAX_WORKERS: usize = 4;

/// A small thread pool whose results come back in input order.
pub struct TaskPool {
    pool: rayon::ThreadPool,
}

impl TaskPool {
    /// Build a pool with `min(requested, MAX_WORKERS, available cores)`
    /// threads. Without a request, `MAX_WORKERS` is used as the request.
    pub fn new(requested: Option<usize>) -> Result<Self> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let num_threads = requested
            .unwrap_or(MAX_WORKERS)
            .clamp(1, MAX_WORKERS)
            .min(cores);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("scene-batch-{i}"))
            .build()?;
        tracing::debug!("worker pool with {num_threads} threads");
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `f` to every item in parallel.
    ///
    /// The output has the same order as `items`. If any call fails, the
    /// error of the lowest failing index is returned.
    pub fn map_ordered<I, T, E, F>(&self, items: &[I], f: F) -> std::result::Result<Vec<T>, E>
    where
        I: Sync,
        T: Send,
        E: Send,
        F: Fn(&I) -> std::result::Result<T, E> + Sync + Send,
    {
        let results: Vec<std::result::Result<T, E>> =
            self.pool.install(|| items.par_iter().map(&f).collect());
        results.into_iter().collect()
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}
