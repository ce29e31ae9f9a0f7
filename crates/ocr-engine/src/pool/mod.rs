//! Named worker pools with resource validation and backpressure.
//!
//! [`PoolManager`] is the single authority over how many OS threads are live for
//! OCR work. It sizes each named pool against a host-derived thread budget,
//! replaces pools that were shut down, and gates task admission so the number of
//! admitted-but-unfinished tasks never exceeds twice the budget.
//!
//! The manager is an ordinary value: construct one, wrap it in an `Arc`, and hand
//! it to every component that schedules work.
//!
//! # Example
//!
//! ```rust,no_run
//! use ocr_engine::pool::PoolManager;
//!
//! # fn main() -> ocr_engine::Result<()> {
//! let manager = PoolManager::new();
//! let handle = manager.submit_with_backpressure("thumbnails", || 2 + 2)?;
//! assert_eq!(handle.join()?, 4);
//! manager.shutdown_all(true, None);
//! # Ok(())
//! # }
//! ```

mod manager;
mod task;
mod worker;

pub use manager::{ManagedPool, ManagerStats, PoolInfo, PoolManager, SystemInfo};
pub use task::{CompletionQueue, TaskHandle};
pub use worker::WorkerPool;

use std::time::Duration;

/// Lower bound for the computed thread budget.
pub const MIN_THREAD_BUDGET: usize = 4;

/// Sleep between admission checks while backpressure is active.
pub const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-OS ceiling on threads the manager will commit.
pub fn platform_thread_ceiling() -> usize {
    if cfg!(target_os = "windows") {
        64
    } else if cfg!(target_os = "macos") {
        128
    } else {
        256
    }
}

/// `max(4, min(2 × cpu_count, platform ceiling))`.
pub fn compute_thread_budget(cpu_count: usize) -> usize {
    cpu_count
        .saturating_mul(2)
        .min(platform_thread_ceiling())
        .max(MIN_THREAD_BUDGET)
}
