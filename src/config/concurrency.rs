use crate::error::{MotionError, MotionResult};
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

/// Per-instance job pool used to score candidate motion samples.
///
/// Every state machine owns its pool; nothing here is process-wide.
pub struct SamplingPool {
    /// Job-based thread pool for CPU-intensive work (rayon)
    job_pool: rayon::ThreadPool,
    /// Current thread pool configuration
    pool_config: ThreadPoolConfig,
}

impl std::fmt::Debug for SamplingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingPool")
            .field("pool_config", &self.pool_config)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub job_threads: usize,
    pub stack_size: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            job_threads: (num_cpus / 2).max(1),
            stack_size: Some(2 * 1024 * 1024), // 2MB stack size
        }
    }
}

impl SamplingPool {
    pub fn new(config: ThreadPoolConfig) -> MotionResult<Self> {
        tracing::info!("Initializing sampling pool with config: {:?}", config);

        let mut job_pool_builder = ThreadPoolBuilder::new()
            .num_threads(config.job_threads.max(1))
            .thread_name(|index| format!("mg-sample-{}", index));

        if let Some(stack_size) = config.stack_size {
            job_pool_builder = job_pool_builder.stack_size(stack_size);
        }

        let job_pool = job_pool_builder
            .build()
            .map_err(|e| MotionError::Worker {
                reason: format!("Failed to create sampling pool: {}", e),
            })?;

        Ok(Self {
            job_pool,
            pool_config: config,
        })
    }

    /// Execute parallel work using rayon's parallel iterators
    pub fn execute_parallel<I, F, R>(&self, iter: I, func: F) -> Vec<R>
    where
        I: rayon::prelude::IntoParallelIterator + Send,
        F: Fn(I::Item) -> R + Sync + Send,
        R: Send,
        I::Item: Send,
    {
        use rayon::prelude::*;
        self.job_pool.install(|| iter.into_par_iter().map(func).collect())
    }

    /// Index of the item with the lowest score, ties keep the earliest item
    pub fn argmin_by_score<T, F>(&self, items: &[T], score: F) -> Option<usize>
    where
        T: Sync,
        F: Fn(&T) -> f32 + Sync + Send,
    {
        let scores = self.execute_parallel(items, |item| score(item));
        scores
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_finite())
            .fold(None, |best: Option<(usize, f32)>, (idx, &s)| match best {
                Some((_, best_score)) if best_score <= s => best,
                _ => Some((idx, s)),
            })
            .map(|(idx, _)| idx)
    }

    pub fn get_stats(&self) -> SamplingPoolStats {
        SamplingPoolStats {
            job_threads: self.pool_config.job_threads,
            current_threads: self.job_pool.current_num_threads(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplingPoolStats {
    pub job_threads: usize,
    pub current_threads: usize,
}
