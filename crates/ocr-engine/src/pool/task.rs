use super::PoolManager;
use crate::{OcrError, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Handle to a task submitted through [`PoolManager::submit_with_backpressure`].
///
/// A panic inside the task surfaces as `OcrError::TaskPanicked` from
/// [`join`](Self::join). Timeouts are applied here, at the result level; the
/// task itself keeps running.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn channel() -> (Sender<Result<T>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    /// Block until the task finishes.
    pub fn join(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| OcrError::Other("Task was dropped before producing a result".to_string()))?
    }

    /// Block for at most `timeout`.
    pub fn join_timeout(&self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(OcrError::Other(format!(
                "Task did not complete within {:?}",
                timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(OcrError::Other(
                "Task was dropped before producing a result".to_string(),
            )),
        }
    }

    /// Non-blocking poll. `None` while the task is still running.
    pub fn try_join(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(OcrError::Other(
                "Task was dropped before producing a result".to_string(),
            ))),
        }
    }
}

/// Yields results of several submitted tasks in completion order.
///
/// Every task is admitted through the manager's backpressure gate. `K` tags each
/// result with whatever the caller needs to attribute it (an index, a path).
pub struct CompletionQueue<K, T> {
    tx: Sender<(K, Result<T>)>,
    rx: Receiver<(K, Result<T>)>,
    pending: usize,
}

impl<K, T> CompletionQueue<K, T>
where
    K: Send + 'static,
    T: Send + 'static,
{
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx, pending: 0 }
    }

    /// Tasks submitted but not yet yielded.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Submit `task` to `pool_name`, blocking while the manager applies backpressure.
    pub fn submit<F>(&mut self, manager: &PoolManager, pool_name: &str, key: K, task: F) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let tx = self.tx.clone();
        manager.submit_with_callback(pool_name, task, move |outcome| {
            let _ = tx.send((key, outcome));
        })?;
        self.pending += 1;
        Ok(())
    }

    /// Block for the next finished task. `None` once everything submitted has been yielded.
    pub fn next_completed(&mut self) -> Option<(K, Result<T>)> {
        if self.pending == 0 {
            return None;
        }
        let item = self.rx.recv().ok()?;
        self.pending -= 1;
        Some(item)
    }
}

impl<K, T> Default for CompletionQueue<K, T>
where
    K: Send + 'static,
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Iterator for CompletionQueue<K, T>
where
    K: Send + 'static,
    T: Send + 'static,
{
    type Item = (K, Result<T>);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_completed()
    }
}
