//! Serialized execution on top of a task queue.
//!
//! A [`Serializer`] guarantees that tasks posted through it execute
//! one-at-a-time in submission order, regardless of how many workers drain
//! the underlying queue. Internally it keeps a lock-free FIFO of pending
//! tasks plus an atomic count of unfinished posts; the post that raises
//! the count from zero owns the strand and dispatches one drain onto the
//! queue, which runs the FIFO until the count falls back to zero.
//!
//! Each push happens before the increment that publishes it, and the
//! drain observes the count before popping, so a task is never stranded
//! between a finishing drain and a racing post. A panicking task
//! re-dispatches the drain for whatever is left, so the strand stays
//! usable.

use crate::queue::{Task, TaskQueue};
use crossbeam_queue::SegQueue;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct SerializerInner {
    queue: Arc<TaskQueue>,
    pending: SegQueue<Task>,
    /// Posted-but-unfinished task count; nonzero means a drain is live
    /// (or about to be dispatched).
    outstanding: AtomicUsize,
}

fn drain(inner: &Arc<SerializerInner>) {
    loop {
        let Some(task) = inner.pending.pop() else {
            // The count said more work exists, so its push is mid-flight.
            std::hint::spin_loop();
            continue;
        };

        let guard = RedispatchGuard {
            inner,
            armed: Cell::new(true),
        };
        task();
        guard.armed.set(false);
        drop(guard);

        if inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            return;
        }
    }
}

/// Keeps the strand alive across a panicking task: accounts for the
/// failed task and re-dispatches the drain if more work is pending.
struct RedispatchGuard<'a> {
    inner: &'a Arc<SerializerInner>,
    armed: Cell<bool>,
}

impl Drop for RedispatchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed.get() {
            return;
        }
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) != 1 {
            let owned = Arc::clone(self.inner);
            self.inner.queue.post(move || drain(&owned));
        }
    }
}

/// Executor adapter guaranteeing FIFO, at-most-one execution of the tasks
/// posted through it (the classical "strand" contract).
///
/// Cloning is cheap and clones share the same FIFO and ownership count.
///
/// # Example
///
/// ```
/// use taskgrove::queue::{Serializer, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let strand = Serializer::new(queue.clone());
/// strand.post(|| println!("first"));
/// strand.post(|| println!("second"));
/// queue.drain_all();
/// ```
#[derive(Clone)]
pub struct Serializer {
    inner: Arc<SerializerInner>,
}

impl Serializer {
    /// Creates a serializer bound to the given queue.
    #[must_use]
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            inner: Arc::new(SerializerInner {
                queue,
                pending: SegQueue::new(),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Enqueues a task to run serialized with every other task posted
    /// through this serializer (or a clone of it).
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.pending.push(Box::new(task));
        if self.inner.outstanding.fetch_add(1, Ordering::AcqRel) == 0 {
            let owned = Arc::clone(&self.inner);
            self.inner.queue.post(move || drain(&owned));
        }
    }

    /// Returns the queue this serializer dispatches onto.
    #[must_use]
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.inner.queue
    }

    /// Returns true if `other` is a clone of this serializer.
    #[must_use]
    pub fn same_serializer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializer")
            .field("pending", &self.inner.pending.len())
            .field("outstanding", &self.inner.outstanding.load(Ordering::Relaxed))
            .finish()
    }
}
