use crate::{OcrError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// A named, fixed-size rayon thread pool tracked by the [`PoolManager`](super::PoolManager).
///
/// Dropping the last handle lets rayon retire the threads once every spawned
/// job has run; marking a pool dead only removes it from the manager's view.
pub struct WorkerPool {
    name: String,
    workers: usize,
    created_at: SystemTime,
    pool: rayon::ThreadPool,
    state: Arc<PoolState>,
}

/// Counters shared with in-flight jobs.
struct PoolState {
    submitted: AtomicU64,
    completed: AtomicU64,
    live: AtomicBool,
    in_flight: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the in-flight count when a job ends, however it ends.
struct InFlightGuard {
    state: Arc<PoolState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.completed.fetch_add(1, Ordering::AcqRel);
        let mut in_flight = self.state.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.state.idle.notify_all();
        }
    }
}

impl WorkerPool {
    pub(crate) fn new(name: &str, workers: usize) -> Result<Self> {
        let thread_prefix = format!("ocr-{}", name);
        let pool_name = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |index| format!("{}-{}", thread_prefix, index))
            .panic_handler(move |_| {
                tracing::error!(pool = %pool_name, "Worker job panicked outside task wrapper");
            })
            .build()
            .map_err(|e| OcrError::Other(format!("Failed to build thread pool '{}': {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            workers,
            created_at: SystemTime::now(),
            pool,
            state: Arc::new(PoolState {
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                live: AtomicBool::new(true),
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn is_live(&self) -> bool {
        self.state.live.load(Ordering::Acquire)
    }

    pub fn tasks_submitted(&self) -> u64 {
        self.state.submitted.load(Ordering::Acquire)
    }

    pub fn tasks_completed(&self) -> u64 {
        self.state.completed.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        *self.state.in_flight.lock()
    }

    /// Queue `job` on this pool. Jobs spawned after the pool was marked dead
    /// still run.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.submitted.fetch_add(1, Ordering::AcqRel);
        *self.state.in_flight.lock() += 1;

        let guard = InFlightGuard {
            state: Arc::clone(&self.state),
        };
        self.pool.spawn(move || {
            let _guard = guard;
            job();
        });
    }

    pub(crate) fn mark_dead(&self) {
        self.state.live.store(false, Ordering::Release);
    }

    /// Block until no job is in flight. `None` waits indefinitely.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut in_flight = self.state.in_flight.lock();
        while *in_flight > 0 {
            match deadline {
                Some(deadline) => {
                    if self.state.idle.wait_until(&mut in_flight, deadline).timed_out() {
                        return *in_flight == 0;
                    }
                }
                None => self.state.idle.wait(&mut in_flight),
            }
        }
        true
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("live", &self.is_live())
            .field("submitted", &self.tasks_submitted())
            .field("completed", &self.tasks_completed())
            .finish()
    }
}
