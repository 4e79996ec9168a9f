//! Promise/future pair associated with a task queue.
//!
//! Unlike the standard library pair, readiness can be consumed
//! asynchronously: [`CoroutineFuture::async_wait`] posts a handler to the
//! associated queue the moment the shared state becomes ready (or
//! immediately, if it already is). Synchronous waiting (`wait`,
//! `wait_for`, `wait_until`) and a blocking `get` are also provided.
//!
//! The value can be taken exactly once; a second `get` reports
//! [`ErrorKind::NoState`](crate::error::ErrorKind). Completing a promise
//! twice reports [`ErrorKind::PromiseBroken`](crate::error::ErrorKind),
//! and a promise dropped without completing breaks its future the same
//! way.

use crate::error::{Error, ErrorKind, Result};
use crate::queue::{Task, TaskQueue};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a timeboxed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    /// The shared state became ready within the wait.
    Ready,
    /// The wait elapsed first.
    Timeout,
}

struct FutureInner<T> {
    outcome: Option<Result<T>>,
    taken: bool,
    handlers: Vec<Task>,
}

struct FutureShared<T> {
    queue: Arc<TaskQueue>,
    inner: Mutex<FutureInner<T>>,
    ready_cv: Condvar,
    ready: AtomicBool,
}

/// The producing half: completes the shared state exactly once.
pub struct CoroutinePromise<T> {
    shared: Arc<FutureShared<T>>,
}

impl<T> CoroutinePromise<T> {
    /// Creates a promise whose future posts `async_wait` handlers to
    /// `queue`.
    #[must_use]
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            shared: Arc::new(FutureShared {
                queue,
                inner: Mutex::new(FutureInner {
                    outcome: None,
                    taken: false,
                    handlers: Vec::new(),
                }),
                ready_cv: Condvar::new(),
                ready: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a future observing this promise's state.
    #[must_use]
    pub fn get_future(&self) -> CoroutineFuture<T> {
        CoroutineFuture {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Completes the state with a value.
    ///
    /// Fails with [`ErrorKind::PromiseBroken`] if already completed.
    pub fn set_value(&self, value: T) -> Result<()> {
        self.complete(Ok(value))
    }

    /// Completes the state with an error.
    ///
    /// Fails with [`ErrorKind::PromiseBroken`] if already completed.
    pub fn set_error(&self, error: Error) -> Result<()> {
        self.complete(Err(error))
    }

    fn complete(&self, outcome: Result<T>) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if self.shared.ready.load(Ordering::Acquire) {
            return Err(
                Error::new(ErrorKind::PromiseBroken).with_context("promise already completed")
            );
        }
        inner.outcome = Some(outcome);
        self.shared.ready.store(true, Ordering::Release);
        let handlers = std::mem::take(&mut inner.handlers);
        drop(inner);

        self.shared.ready_cv.notify_all();
        for handler in handlers {
            self.shared.queue.post(handler);
        }
        Ok(())
    }
}

impl<T> Drop for CoroutinePromise<T> {
    fn drop(&mut self) {
        if !self.shared.ready.load(Ordering::Acquire) {
            let _ = self.complete(Err(Error::new(ErrorKind::PromiseBroken)
                .with_context("promise dropped without completing")));
        }
    }
}

impl<T> std::fmt::Debug for CoroutinePromise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutinePromise")
            .field("ready", &self.shared.ready.load(Ordering::Relaxed))
            .finish()
    }
}

/// The observing half of a promise/future pair.
///
/// Cheap to clone; clones share the same state and the same
/// take-exactly-once value.
pub struct CoroutineFuture<T> {
    shared: Arc<FutureShared<T>>,
}

impl<T> Clone for CoroutineFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> CoroutineFuture<T> {
    /// True once the promise has completed.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// True while the value has not yet been taken.
    #[must_use]
    pub fn valid(&self) -> bool {
        !self.shared.inner.lock().taken
    }

    /// Returns the queue `async_wait` handlers are posted to.
    #[must_use]
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.shared.queue
    }

    /// Blocks until the shared state is ready.
    pub fn wait(&self) {
        let mut inner = self.shared.inner.lock();
        while !self.shared.ready.load(Ordering::Acquire) {
            self.shared.ready_cv.wait(&mut inner);
        }
    }

    /// Blocks until ready or until `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration) -> FutureStatus {
        self.wait_until(Instant::now() + timeout)
    }

    /// Blocks until ready or until `deadline` passes.
    pub fn wait_until(&self, deadline: Instant) -> FutureStatus {
        let mut inner = self.shared.inner.lock();
        while !self.shared.ready.load(Ordering::Acquire) {
            if self
                .shared
                .ready_cv
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                return if self.shared.ready.load(Ordering::Acquire) {
                    FutureStatus::Ready
                } else {
                    FutureStatus::Timeout
                };
            }
        }
        FutureStatus::Ready
    }

    /// Blocks until ready, then takes the outcome.
    ///
    /// The value can be taken once across all clones; later calls fail
    /// with [`ErrorKind::NoState`].
    pub fn get(&self) -> Result<T> {
        self.wait();
        let mut inner = self.shared.inner.lock();
        match inner.outcome.take() {
            Some(outcome) => {
                inner.taken = true;
                outcome
            }
            None => Err(Error::new(ErrorKind::NoState).with_context("future value already taken")),
        }
    }

    /// Registers a handler posted to the associated queue upon readiness,
    /// or immediately if already ready. Fires exactly once.
    pub fn async_wait(&self, handler: impl FnOnce() + Send + 'static) {
        let mut inner = self.shared.inner.lock();
        if self.shared.ready.load(Ordering::Acquire) {
            drop(inner);
            self.shared.queue.post(handler);
        } else {
            inner.handlers.push(Box::new(handler));
        }
    }
}

impl<T> std::fmt::Debug for CoroutineFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineFuture")
            .field("ready", &self.ready())
            .field("valid", &self.valid())
            .finish()
    }
}
