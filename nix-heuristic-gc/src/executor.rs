//! Map-over-iterable parallelism, with a single-threaded fallback.
//!
//! The engine's only concurrency is embarrassingly parallel: independent
//! calls to compute a node's score (and the lazy stat/substitutability
//! queries that entails). Grounded on the reference executor split (a naive,
//! single-threaded `map` vs. a thread-pool-backed one), reimplemented here
//! atop [`threadpool`] instead of a thread-per-task model.

use std::sync::mpsc;

/// A map-over-iterable primitive. Implementations may run `func` inline or
/// fan it out across worker threads; callers must not rely on result
/// ordering matching input ordering.
pub trait Executor {
    /// Applies `func` to every item in `inputs`, returning the results in an
    /// unspecified order.
    fn map<T, R, F>(&self, inputs: Vec<T>, func: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static;
}

/// Runs every call on the current thread. Used when `--threads 0` is passed.
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn map<T, R, F>(&self, inputs: Vec<T>, func: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        inputs.into_iter().map(func).collect()
    }
}

/// Runs calls across a bounded pool of worker threads.
pub struct ThreadPoolExecutor {
    pool: threadpool::ThreadPool,
}

impl ThreadPoolExecutor {
    /// Builds a pool with `worker_count` threads. `worker_count == 0` is
    /// treated the same as 1 (callers wanting the inline behavior should use
    /// [`InlineExecutor`] instead).
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            pool: threadpool::ThreadPool::new(worker_count),
        }
    }

    /// Builds a pool sized to the host's available parallelism, mirroring the
    /// "automatic" default when `--threads` is not given.
    pub fn new_automatic() -> Self {
        Self::new(num_cpus::get())
    }
}

impl Executor for ThreadPoolExecutor {
    fn map<T, R, F>(&self, inputs: Vec<T>, func: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let func = std::sync::Arc::new(func);
        let mut count = 0usize;

        for input in inputs {
            count += 1;
            let tx = tx.clone();
            let func = func.clone();
            self.pool.execute(move || {
                // the receiver outlives every sender clone; a send failure
                // would only mean the caller dropped `rx`, which doesn't happen
                let _ = tx.send(func(input));
            });
        }
        drop(tx);

        rx.iter().take(count).collect()
    }
}

/// Either executor, chosen once at orchestration time from `--threads`
/// (§4.9). `Executor::map` takes generic closures, which rules out a trait
/// object; this enum gives callers a single concrete type to hold instead.
pub enum AnyExecutor {
    Inline(InlineExecutor),
    Pool(ThreadPoolExecutor),
}

impl AnyExecutor {
    /// `threads == 0` selects the inline executor; `threads == None` selects
    /// an automatically-sized pool; otherwise a pool of that exact size.
    pub fn from_thread_count(threads: Option<usize>) -> Self {
        match threads {
            Some(0) => AnyExecutor::Inline(InlineExecutor),
            Some(n) => AnyExecutor::Pool(ThreadPoolExecutor::new(n)),
            None => AnyExecutor::Pool(ThreadPoolExecutor::new_automatic()),
        }
    }
}

impl Executor for AnyExecutor {
    fn map<T, R, F>(&self, inputs: Vec<T>, func: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        match self {
            AnyExecutor::Inline(e) => e.map(inputs, func),
            AnyExecutor::Pool(e) => e.map(inputs, func),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_preserves_all_results() {
        let exec = InlineExecutor;
        let mut out = exec.map(vec![1, 2, 3, 4], |x| x * 2);
        out.sort();
        assert_eq!(out, vec![2, 4, 6, 8]);
    }

    #[test]
    fn thread_pool_preserves_all_results() {
        let exec = ThreadPoolExecutor::new(4);
        let mut out = exec.map((0..100).collect(), |x: i32| x * x);
        out.sort();
        let expected: Vec<i32> = (0..100).map(|x| x * x).collect();
        assert_eq!(out, expected);
    }
}
