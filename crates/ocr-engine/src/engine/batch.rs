//! Batch and streaming extraction over the pool manager.
//!
//! Per-item failures never abort a batch: they come back as
//! [`ExtractionResult::failed`] records in the same result stream.

use super::{EngineInner, OcrEngine};
use crate::config::OcrOptions;
use crate::pool::CompletionQueue;
use crate::types::ExtractionResult;
use crate::{OcrError, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Pool used by [`OcrEngine::extract_batch`].
pub const BATCH_POOL: &str = "ocr_batch_process";

/// Pool used by [`OcrEngine::extract_batch_streaming`], recreated per chunk.
pub const STREAMING_POOL: &str = "ocr_streaming";

type Outcome = Result<ExtractionResult>;

/// Cooperative cancellation flag for streaming batches.
///
/// Checked before each chunk is submitted. Work already handed to the pool
/// runs to completion and is still yielded.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

fn into_result(path: PathBuf, outcome: Result<Outcome>) -> ExtractionResult {
    match outcome.and_then(|inner| inner) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Batch item failed");
            ExtractionResult::failed(path, &e)
        }
    }
}

fn submit_item(
    queue: &mut CompletionQueue<PathBuf, Outcome>,
    inner: &Arc<EngineInner>,
    pool_name: &str,
    path: PathBuf,
    options: &Option<OcrOptions>,
) -> std::result::Result<(), (PathBuf, OcrError)> {
    let engine = Arc::clone(inner);
    let options = options.clone();
    let task_path = path.clone();

    queue
        .submit(&inner.manager, pool_name, path.clone(), move || {
            engine.extract_text(&task_path, options.as_ref())
        })
        .map_err(|e| (path, e))
}

impl OcrEngine {
    /// Extract every path on the shared batch pool.
    ///
    /// Results arrive in completion order, one per input path. `max_workers`
    /// defaults to the configured `max_workers` and only applies when the batch
    /// pool is first created.
    pub fn extract_batch<P: AsRef<Path>>(
        &self,
        paths: &[P],
        options: Option<&OcrOptions>,
        max_workers: Option<usize>,
    ) -> Vec<ExtractionResult> {
        self.extract_batch_with_progress(paths, options, max_workers, |_, _| {})
    }

    /// [`extract_batch`](Self::extract_batch) reporting `(done, total)` after each item.
    pub fn extract_batch_with_progress<P, F>(
        &self,
        paths: &[P],
        options: Option<&OcrOptions>,
        max_workers: Option<usize>,
        mut progress: F,
    ) -> Vec<ExtractionResult>
    where
        P: AsRef<Path>,
        F: FnMut(usize, usize),
    {
        let total = paths.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = max_workers.unwrap_or(self.inner.config.max_workers);
        let mut results = Vec::with_capacity(total);

        let _pool = match self.inner.manager.managed_pool(BATCH_POOL, Some(workers)) {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!(error = %e, "Failed to acquire batch pool");
                for (done, path) in paths.iter().enumerate() {
                    results.push(ExtractionResult::failed(path.as_ref(), &e));
                    progress(done + 1, total);
                }
                return results;
            }
        };

        tracing::info!(total, workers, "Starting batch extraction");

        let options = options.cloned();
        let mut queue = CompletionQueue::new();
        for path in paths {
            if let Err((path, e)) = submit_item(&mut queue, &self.inner, BATCH_POOL, path.as_ref().to_path_buf(), &options) {
                results.push(ExtractionResult::failed(path, &e));
                progress(results.len(), total);
            }
        }

        for (path, outcome) in queue {
            results.push(into_result(path, outcome));
            progress(results.len(), total);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(total, failed, "Batch extraction finished");
        results
    }

    /// Lazily extract `paths` in chunks of `batch_size`.
    ///
    /// Each chunk runs on a fresh streaming pool with at most
    /// `min(max_workers, chunk length)` threads, so no more than one chunk's
    /// worth of work is in flight at a time.
    pub fn extract_batch_streaming<P: AsRef<Path>>(
        &self,
        paths: &[P],
        options: Option<&OcrOptions>,
        max_workers: Option<usize>,
        batch_size: Option<usize>,
    ) -> BatchStream {
        self.extract_batch_streaming_with_cancel(paths, options, max_workers, batch_size, CancellationToken::new())
    }

    pub fn extract_batch_streaming_with_cancel<P: AsRef<Path>>(
        &self,
        paths: &[P],
        options: Option<&OcrOptions>,
        max_workers: Option<usize>,
        batch_size: Option<usize>,
        cancel: CancellationToken,
    ) -> BatchStream {
        let max_workers = max_workers.unwrap_or(self.inner.config.max_workers).max(1);
        let batch_size = batch_size.unwrap_or(self.inner.config.batch_size).max(1);

        BatchStream {
            inner: Arc::clone(&self.inner),
            options: options.cloned(),
            remaining: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            max_workers,
            batch_size,
            cancel,
            ready: VecDeque::new(),
            queue: None,
            chunks_started: 0,
        }
    }
}

/// Iterator returned by [`OcrEngine::extract_batch_streaming`].
///
/// Nothing is submitted until the first call to `next`. Dropping the stream
/// mid-chunk abandons the streaming pool without waiting for it.
pub struct BatchStream {
    inner: Arc<EngineInner>,
    options: Option<OcrOptions>,
    remaining: VecDeque<PathBuf>,
    max_workers: usize,
    batch_size: usize,
    cancel: CancellationToken,
    ready: VecDeque<ExtractionResult>,
    queue: Option<CompletionQueue<PathBuf, Outcome>>,
    chunks_started: usize,
}

impl BatchStream {
    /// Paths not yet handed to a pool.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Submit the next chunk. Returns `false` when there is nothing left to do.
    fn start_chunk(&mut self) -> bool {
        if self.remaining.is_empty() {
            return false;
        }
        if self.cancel.is_cancelled() {
            tracing::info!(skipped = self.remaining.len(), "Streaming batch cancelled");
            self.remaining.clear();
            return false;
        }

        let take = self.batch_size.min(self.remaining.len());
        let chunk: Vec<PathBuf> = self.remaining.drain(..take).collect();
        let workers = self.max_workers.min(chunk.len());
        self.chunks_started += 1;

        if let Err(e) = self.inner.manager.get_pool(STREAMING_POOL, Some(workers)) {
            tracing::error!(error = %e, "Failed to create streaming pool");
            self.ready.extend(chunk.into_iter().map(|path| ExtractionResult::failed(path, &e)));
            return true;
        }

        tracing::debug!(chunk = self.chunks_started, size = chunk.len(), workers, "Submitting streaming chunk");

        let mut queue = CompletionQueue::new();
        for path in chunk {
            if let Err((path, e)) = submit_item(&mut queue, &self.inner, STREAMING_POOL, path, &self.options) {
                self.ready.push_back(ExtractionResult::failed(path, &e));
            }
        }
        self.queue = Some(queue);
        true
    }

    fn finish_chunk(&mut self) {
        self.queue = None;
        self.inner.manager.shutdown_pool(STREAMING_POOL, true, None);
    }
}

impl Iterator for BatchStream {
    type Item = ExtractionResult;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(result) = self.ready.pop_front() {
                return Some(result);
            }

            if let Some(queue) = self.queue.as_mut() {
                match queue.next_completed() {
                    Some((path, outcome)) => return Some(into_result(path, outcome)),
                    None => {
                        self.finish_chunk();
                        continue;
                    }
                }
            }

            if !self.start_chunk() {
                return None;
            }
        }
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        if self.queue.take().is_some() {
            self.inner.manager.shutdown_pool(STREAMING_POOL, false, None);
        }
    }
}

impl std::fmt::Debug for BatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStream")
            .field("remaining", &self.remaining.len())
            .field("ready", &self.ready.len())
            .field("in_flight", &self.queue.as_ref().map_or(0, |q| q.pending()))
            .field("batch_size", &self.batch_size)
            .field("max_workers", &self.max_workers)
            .finish()
    }
}
