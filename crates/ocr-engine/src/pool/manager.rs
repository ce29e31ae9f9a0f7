use super::task::TaskHandle;
use super::worker::WorkerPool;
use super::{BACKPRESSURE_POLL_INTERVAL, compute_thread_budget};
use crate::{OcrError, Result};
use parking_lot::ReentrantMutex;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// Creates, sizes and tracks named worker pools and gates task admission.
///
/// # Thread Safety
///
/// The pool registry sits behind a re-entrant lock so lookup can validate a new
/// pool's size while already holding it. The active-task counter is atomic and
/// shared with every admitted task.
pub struct PoolManager {
    cpu_count: usize,
    max_threads: usize,
    default_workers: usize,
    max_active_tasks: usize,
    pools: ReentrantMutex<RefCell<HashMap<String, Arc<WorkerPool>>>>,
    active_tasks: Arc<AtomicUsize>,
    waiting_submitters: AtomicUsize,
}

/// Host facts the budget was derived from.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub cpu_count: usize,
    pub max_threads: usize,
}

/// Snapshot of one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolInfo {
    pub active: bool,
    pub workers: usize,
    pub created_at: SystemTime,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub in_flight: usize,
}

/// Snapshot returned by [`PoolManager::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub system: SystemInfo,
    pub pools: BTreeMap<String, PoolInfo>,
    pub active_tasks: usize,
    pub backpressure: bool,
}

/// Scoped pool handle from [`PoolManager::managed_pool`].
///
/// Dropping it leaves the pool running: pools are long-lived and reused across
/// calls, and only [`PoolManager::shutdown_pool`] or
/// [`PoolManager::shutdown_all`] tear them down.
pub struct ManagedPool {
    pool: Arc<WorkerPool>,
}

impl ManagedPool {
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

impl Deref for ManagedPool {
    type Target = WorkerPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Drop for ManagedPool {
    fn drop(&mut self) {
        tracing::trace!(pool = %self.pool.name(), "Managed pool scope ended, pool kept for reuse");
    }
}

/// Releases one active-task slot on drop.
struct ActiveTaskGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PoolManager {
    /// Build a manager sized from the host's CPU count.
    pub fn new() -> Self {
        let cpu_count = num_cpus::get();
        Self::build(cpu_count, compute_thread_budget(cpu_count))
    }

    /// Build a manager with an explicit thread budget instead of the host-derived one.
    pub fn with_thread_budget(max_threads: usize) -> Self {
        Self::build(num_cpus::get(), max_threads.max(1))
    }

    fn build(cpu_count: usize, max_threads: usize) -> Self {
        let default_workers = (max_threads / 2).clamp(1, 4);
        tracing::info!(cpu_count, max_threads, default_workers, "PoolManager initialized");

        Self {
            cpu_count,
            max_threads,
            default_workers,
            max_active_tasks: max_threads * 2,
            pools: ReentrantMutex::new(RefCell::new(HashMap::new())),
            active_tasks: Arc::new(AtomicUsize::new(0)),
            waiting_submitters: AtomicUsize::new(0),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn default_workers(&self) -> usize {
        self.default_workers
    }

    /// Admission limit: submissions block while this many tasks are active.
    pub fn max_active_tasks(&self) -> usize {
        self.max_active_tasks
    }

    /// Tasks admitted and not yet finished.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Sum of worker counts over live pools.
    pub fn committed_workers(&self) -> usize {
        let guard = self.pools.lock();
        let pools = guard.borrow();
        pools.values().filter(|p| p.is_live()).map(|p| p.workers()).sum()
    }

    /// Clamp `requested` to what the remaining thread budget allows.
    ///
    /// Never fails: the result is always in `[1, requested]` (or 1 when
    /// `requested` is 0). Logs a warning when the count is reduced.
    pub fn validate_worker_count(&self, requested: usize, pool_name: &str) -> usize {
        let _guard = self.pools.lock();
        let existing = self.committed_workers();
        let available = self.max_threads.saturating_sub(existing);
        let safe = requested.min(available).max(1);

        if safe < requested {
            tracing::warn!(
                pool = %pool_name,
                requested,
                granted = safe,
                system_limit = self.max_threads,
                existing,
                "Reducing worker count"
            );
        }

        safe
    }

    /// Return the live pool named `pool_name`, creating it if absent or dead.
    ///
    /// `max_workers` only applies when a pool is created; `None` or 0 uses the
    /// default worker count.
    pub fn get_pool(&self, pool_name: &str, max_workers: Option<usize>) -> Result<Arc<WorkerPool>> {
        let guard = self.pools.lock();

        let existing = guard.borrow().get(pool_name).cloned();
        if let Some(pool) = existing {
            if pool.is_live() {
                return Ok(pool);
            }
            tracing::debug!(pool = %pool_name, "Purging dead pool");
            guard.borrow_mut().remove(pool_name);
        }

        let requested = max_workers.filter(|n| *n > 0).unwrap_or(self.default_workers);
        let workers = self.validate_worker_count(requested, pool_name);
        let pool = Arc::new(WorkerPool::new(pool_name, workers)?);
        guard.borrow_mut().insert(pool_name.to_string(), Arc::clone(&pool));

        tracing::info!(pool = %pool_name, workers, "Created thread pool");
        Ok(pool)
    }

    /// Scoped acquisition of a pool. See [`ManagedPool`] for the lifetime policy.
    pub fn managed_pool(&self, pool_name: &str, max_workers: Option<usize>) -> Result<ManagedPool> {
        Ok(ManagedPool {
            pool: self.get_pool(pool_name, max_workers)?,
        })
    }

    /// Run `task` on `pool_name` once the active-task count is below the limit.
    ///
    /// Blocks the calling thread (polling every 10ms) while the manager is
    /// saturated; never rejects. The active-task counter is released when the
    /// task ends, including when it panics.
    pub fn submit_with_backpressure<F, T>(&self, pool_name: &str, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, handle) = TaskHandle::channel();
        self.submit_with_callback(pool_name, task, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        Ok(handle)
    }

    pub(crate) fn submit_with_callback<F, T, D>(&self, pool_name: &str, task: F, deliver: D) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
        D: FnOnce(Result<T>) + Send + 'static,
    {
        let slot = self.admit();
        let pool = self.get_pool(pool_name, None)?;
        let name = pool_name.to_string();

        pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task)).map_err(OcrError::from_panic);
            if let Err(err) = &outcome {
                tracing::error!(pool = %name, error = %err, "Task panicked");
            }
            drop(slot);
            deliver(outcome);
        });

        Ok(())
    }

    fn admit(&self) -> ActiveTaskGuard {
        let mut waiting = false;

        loop {
            let current = self.active_tasks.load(Ordering::Acquire);
            if current < self.max_active_tasks {
                if self
                    .active_tasks
                    .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    if waiting {
                        self.waiting_submitters.fetch_sub(1, Ordering::AcqRel);
                    }
                    return ActiveTaskGuard {
                        counter: Arc::clone(&self.active_tasks),
                    };
                }
                continue;
            }

            if !waiting {
                waiting = true;
                self.waiting_submitters.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(
                    active_tasks = current,
                    limit = self.max_active_tasks,
                    "Task queue full, applying backpressure"
                );
            }
            std::thread::sleep(BACKPRESSURE_POLL_INTERVAL);
        }
    }

    /// Mark `pool_name` dead and remove it.
    ///
    /// With `wait`, blocks until the pool's in-flight jobs finish or `timeout`
    /// elapses; otherwise in-flight jobs are abandoned to finish on their own.
    /// Returns `false` if no such pool existed.
    pub fn shutdown_pool(&self, pool_name: &str, wait: bool, timeout: Option<Duration>) -> bool {
        let removed = {
            let guard = self.pools.lock();
            let pool = guard.borrow_mut().remove(pool_name);
            pool
        };

        let Some(pool) = removed else {
            return false;
        };

        if pool.is_live() {
            tracing::info!(pool = %pool_name, wait, "Shutting down thread pool");
            pool.mark_dead();
            if wait && !pool.wait_idle(timeout) {
                tracing::warn!(
                    pool = %pool_name,
                    in_flight = pool.in_flight(),
                    "Timed out waiting for pool to drain"
                );
            }
        }

        tracing::info!(
            pool = %pool_name,
            submitted = pool.tasks_submitted(),
            completed = pool.tasks_completed(),
            "Pool stats"
        );
        true
    }

    /// Shut down every pool. `timeout` bounds the whole call, not each pool.
    pub fn shutdown_all(&self, wait: bool, timeout: Option<Duration>) {
        tracing::info!("Shutting down all thread pools");
        let deadline = timeout.map(|t| Instant::now() + t);

        let names: Vec<String> = {
            let guard = self.pools.lock();
            let names = guard.borrow().keys().cloned().collect();
            names
        };

        for name in names {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            self.shutdown_pool(&name, wait, remaining);
        }

        tracing::info!("All thread pools shut down");
    }

    pub fn get_stats(&self) -> ManagerStats {
        let guard = self.pools.lock();
        let pools = guard
            .borrow()
            .iter()
            .map(|(name, pool)| {
                (
                    name.clone(),
                    PoolInfo {
                        active: pool.is_live(),
                        workers: pool.workers(),
                        created_at: pool.created_at(),
                        tasks_submitted: pool.tasks_submitted(),
                        tasks_completed: pool.tasks_completed(),
                        in_flight: pool.in_flight(),
                    },
                )
            })
            .collect();

        ManagerStats {
            system: SystemInfo {
                cpu_count: self.cpu_count,
                max_threads: self.max_threads,
            },
            pools,
            active_tasks: self.active_tasks(),
            backpressure: self.waiting_submitters.load(Ordering::Acquire) > 0,
        }
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("max_threads", &self.max_threads)
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}
