//! The coroutine facility.
//!
//! [`spawn`] runs a blocking-style body on its own coroutine, resumed
//! through a serializer so its stack is touched by at most one thread at
//! a time. Inside the body, [`CoroutineContext::get_caller`] produces a
//! completion handler for any asynchronous operation; awaiting the paired
//! [`ValueSlot`] suspends the coroutine until the handler fires.
//!
//! [`spawn_with_future`] additionally routes the body's result (or error,
//! or panic) into a [`CoroutineFuture`], and [`run_until_complete`] spins
//! a queue on the current thread until such a future is ready.
//!
//! - [`context`]: the coroutine record and its weak handle
//! - [`slot`]: caller/value-slot completion bridge
//! - [`future`]: promise/future pair bound to a queue
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use taskgrove::coro::{run_until_complete, spawn_with_future, CoroutineContext};
//! use taskgrove::error::Result;
//! use taskgrove::queue::TaskQueue;
//!
//! fn async_sum(a: i32, b: i32, context: &CoroutineContext) -> Result<i32> {
//!     let (caller, value) = context.get_caller::<()>()?;
//!     std::thread::spawn(move || {
//!         std::thread::sleep(Duration::from_millis(1));
//!         caller.complete();
//!     });
//!     value.get()?;
//!     Ok(a + b)
//! }
//!
//! let queue = TaskQueue::new();
//! let future = spawn_with_future(&queue, |context| async_sum(1, 2, &context))?;
//! assert_eq!(run_until_complete(&queue, future).get()?, 3);
//! # Ok::<(), taskgrove::error::Error>(())
//! ```

pub mod context;
pub mod future;
pub mod slot;

pub use context::{CoroutineContext, CoroutineState};
pub use future::{CoroutineFuture, CoroutinePromise, FutureStatus};
pub use slot::{Caller, ErrorCapture, FallibleCaller, ValueSlot};

use crate::error::{Error, PanicPayload, Result};
use crate::queue::{Serializer, TaskQueue};
use context::CancelUnwind;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Anything a coroutine can be bound to.
///
/// A [`Serializer`] is used as-is (several coroutines on one serializer
/// never run concurrently); a queue gets a fresh private serializer; a
/// [`CoroutineContext`] yields a fresh serializer on the same queue.
pub trait SpawnTarget {
    /// Resolves the target into the serializer the coroutine will be
    /// resumed through.
    fn into_serializer(self) -> Result<Serializer>;
}

impl SpawnTarget for Serializer {
    fn into_serializer(self) -> Result<Serializer> {
        Ok(self)
    }
}

impl SpawnTarget for &Serializer {
    fn into_serializer(self) -> Result<Serializer> {
        Ok(self.clone())
    }
}

impl SpawnTarget for Arc<TaskQueue> {
    fn into_serializer(self) -> Result<Serializer> {
        Ok(Serializer::new(self))
    }
}

impl SpawnTarget for &Arc<TaskQueue> {
    fn into_serializer(self) -> Result<Serializer> {
        Ok(Serializer::new(Arc::clone(self)))
    }
}

impl SpawnTarget for &CoroutineContext {
    fn into_serializer(self) -> Result<Serializer> {
        let executor = self.executor()?;
        Ok(Serializer::new(Arc::clone(executor.queue())))
    }
}

/// Spawns a coroutine on the given executor.
///
/// Returns before the body's first statement: the body runs only once a
/// drainer of the underlying queue dispatches the coroutine's first
/// resumption.
pub fn spawn<E, F>(executor: E, body: F) -> Result<()>
where
    E: SpawnTarget,
    F: FnOnce(CoroutineContext) + Send + 'static,
{
    let serializer = executor.into_serializer()?;
    let record = context::spawn_record(serializer, body)?;
    context::post_resume(&record);
    Ok(())
}

/// Spawns a coroutine and returns a future for its result.
///
/// An `Err` returned by the body lands in the future as-is; a panic is
/// captured and surfaced as
/// [`ErrorKind::CoroutinePanicked`](crate::error::ErrorKind).
pub fn spawn_with_future<E, F, T>(executor: E, body: F) -> Result<CoroutineFuture<T>>
where
    E: SpawnTarget,
    F: FnOnce(CoroutineContext) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let serializer = executor.into_serializer()?;
    let promise = CoroutinePromise::new(Arc::clone(serializer.queue()));
    let future = promise.get_future();

    spawn(serializer, move |context| {
        let outcome = match catch_unwind(AssertUnwindSafe(|| body(context))) {
            Ok(result) => result,
            Err(unwind) => {
                if unwind.is::<CancelUnwind>() {
                    resume_unwind(unwind);
                }
                let payload = PanicPayload::from_unwind(unwind.as_ref());
                Err(Error::coroutine_panicked(&payload))
            }
        };
        let completion = match outcome {
            Ok(value) => promise.set_value(value),
            Err(error) => promise.set_error(error),
        };
        if completion.is_err() {
            tracing::warn!("coroutine result discarded: promise already completed");
        }
    })?;

    Ok(future)
}

/// Spins `queue` on the current thread until `future` is ready, then
/// returns the future. Each spin executes at most one task and waits at
/// most one second.
pub fn run_until_complete<T>(
    queue: &Arc<TaskQueue>,
    future: CoroutineFuture<T>,
) -> CoroutineFuture<T> {
    run_until_complete_with_step(queue, future, Duration::from_secs(1))
}

/// Like [`run_until_complete`] with an explicit per-spin wait bound.
pub fn run_until_complete_with_step<T>(
    queue: &Arc<TaskQueue>,
    future: CoroutineFuture<T>,
    step: Duration,
) -> CoroutineFuture<T> {
    // Pinning keeps each spin blocked on the queue instead of returning
    // immediately while the queue is idle between completions.
    let _pin = TaskQueue::pin(queue);
    while !future.ready() {
        queue.run_one_for(step);
    }
    future
}
