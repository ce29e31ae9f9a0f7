use crate::Result;
use parking_lot::Mutex;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Dropped at thread exit, which lets other threads detect dead entries.
    static THREAD_ALIVE: Arc<()> = Arc::new(());

    static LOCAL_READERS: RefCell<HashMap<u64, Weak<dyn Any + Send + Sync>>> = RefCell::new(HashMap::new());
}

struct ReaderSlot<R> {
    alive: Weak<()>,
    reader: Arc<R>,
}

/// Lazily built, per-thread instances of an expensive reader.
///
/// Each thread gets its own reader on first use. The owning map is shared so any
/// thread can tear down every reader with [`clear`](Self::clear); thread-local
/// slots only hold weak references and stop resolving once the map drops the
/// reader. Entries for threads that have exited are purged on access.
pub struct ThreadReaders<R> {
    id: u64,
    readers: Mutex<HashMap<ThreadId, ReaderSlot<R>>>,
}

impl<R> ThreadReaders<R>
where
    R: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            readers: Mutex::new(HashMap::new()),
        }
    }

    /// Return this thread's reader, building it with `init` if there is none.
    ///
    /// `init` runs without any lock held, so a slow model load on one thread
    /// doesn't stall the others.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<Arc<R>>
    where
        F: FnOnce() -> Result<R>,
    {
        if let Some(reader) = self.local() {
            return Ok(reader);
        }

        let reader = Arc::new(init()?);
        let thread_id = thread::current().id();
        let alive = THREAD_ALIVE.with(Arc::downgrade);

        {
            let mut readers = self.readers.lock();
            purge_dead(&mut readers);
            readers.insert(
                thread_id,
                ReaderSlot {
                    alive,
                    reader: Arc::clone(&reader),
                },
            );
        }

        let erased: Arc<dyn Any + Send + Sync> = reader.clone();
        LOCAL_READERS.with(|slots| {
            slots.borrow_mut().insert(self.id, Arc::downgrade(&erased));
        });

        tracing::debug!(thread = ?thread_id, "Initialized thread-local reader");
        Ok(reader)
    }

    fn local(&self) -> Option<Arc<R>> {
        let erased = LOCAL_READERS.with(|slots| slots.borrow().get(&self.id).and_then(Weak::upgrade))?;
        erased.downcast::<R>().ok()
    }

    /// Readers held for threads that are still running.
    pub fn len(&self) -> usize {
        let mut readers = self.readers.lock();
        purge_dead(&mut readers);
        readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every tracked reader, on all threads. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut readers = self.readers.lock();
            let count = readers.len();
            readers.clear();
            count
        };
        self.clear_current_thread();

        if dropped > 0 {
            tracing::debug!(dropped, "Cleared thread-local readers");
        }
        dropped
    }

    /// Forget the calling thread's slot without touching other threads.
    pub fn clear_current_thread(&self) {
        let _ = LOCAL_READERS.try_with(|slots| {
            slots.borrow_mut().remove(&self.id);
        });
        self.readers.lock().remove(&thread::current().id());
    }
}

impl<R> Default for ThreadReaders<R>
where
    R: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn purge_dead<R>(readers: &mut HashMap<ThreadId, ReaderSlot<R>>) {
    readers.retain(|_, slot| slot.alive.strong_count() > 0);
}
