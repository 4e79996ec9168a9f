//! The completion bridge: value slots and callers.
//!
//! A caller/slot pair turns a coroutine suspension into an ordinary
//! callback. The caller is handed to an asynchronous operation; invoking
//! it stores the operation's output into the slot and resumes the
//! coroutine through its serializer. The coroutine side awaits the slot,
//! which either finds the value already present (synchronous completion)
//! or suspends first and finds it after resumption.
//!
//! The two sides are reconciled by a 2-step counter: each party
//! increments it exactly once when it arrives, and whoever arrives second
//! sees the count reach 2 and proceeds. The caller stores the value
//! *before* incrementing, so the race converges either way — a handler
//! that fires inside the suspension call delivers its value without an
//! intervening yield. This works because a value is produced exactly once
//! and consumed exactly once.

use crate::error::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::context::{post_resume, CoroRecord, CoroutineContext};

/// Externally-bound error destination for fallible completions.
///
/// Installed on a context via
/// [`CoroutineContext::capture_errors`]; when present, a completion error
/// lands here and [`ValueSlot::get`] returns the value instead of the
/// error. Mirrors passing an explicit error-code lvalue to an
/// asynchronous operation.
#[derive(Clone, Debug, Default)]
pub struct ErrorCapture {
    inner: Arc<Mutex<Option<Error>>>,
}

impl ErrorCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the captured error, if any.
    #[must_use]
    pub fn take(&self) -> Option<Error> {
        self.inner.lock().take()
    }

    /// Returns a copy of the captured error, if any.
    #[must_use]
    pub fn get(&self) -> Option<Error> {
        self.inner.lock().clone()
    }

    /// True if an error is currently captured.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.lock().is_some()
    }

    pub(crate) fn set(&self, error: Error) {
        *self.inner.lock() = Some(error);
    }

    pub(crate) fn clear(&self) {
        *self.inner.lock() = None;
    }
}

struct SlotShared<T> {
    context: CoroutineContext,
    value: Mutex<Option<T>>,
    error: Mutex<Option<Error>>,
    steps: AtomicU32,
}

impl<T> SlotShared<T> {
    /// Counts one party's arrival; true when both have arrived.
    fn arrive(&self) -> bool {
        self.steps.fetch_add(1, Ordering::AcqRel) + 1 == 2
    }
}

/// The consuming half of a completion bridge.
///
/// `get` blocks the coroutine (by suspending it) until the paired caller
/// fires, then yields the stored value.
pub struct ValueSlot<T> {
    shared: Arc<SlotShared<T>>,
}

impl<T> ValueSlot<T> {
    /// Awaits the completion value.
    ///
    /// If the paired caller reported an error: with an [`ErrorCapture`]
    /// installed on the creating context the error is routed there and
    /// the value is returned; otherwise the error is returned.
    pub fn get(self) -> Result<T> {
        if !self.shared.arrive() {
            self.shared.context.suspend()?;
        }

        let error = self.shared.error.lock().take();
        match (error, self.shared.context.error_capture()) {
            (Some(error), Some(capture)) => capture.set(error),
            (None, Some(capture)) => capture.clear(),
            (Some(error), None) => return Err(error),
            (None, None) => {}
        }

        self.shared
            .value
            .lock()
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_context("value slot fired empty"))
    }
}

impl<T> std::fmt::Debug for ValueSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSlot")
            .field("steps", &self.shared.steps.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A completion handler that resumes its coroutine when invoked.
///
/// Holds a strong reference to the coroutine record, keeping the
/// coroutine alive while the operation is in flight.
pub struct Caller<T> {
    record: Arc<CoroRecord>,
    shared: Arc<SlotShared<T>>,
}

impl<T> Caller<T> {
    /// Stores `value` and resumes the coroutine (unless the coroutine has
    /// not suspended yet, in which case it will find the value without
    /// yielding).
    pub fn call(self, value: T) {
        *self.shared.value.lock() = Some(value);
        if self.shared.arrive() {
            post_resume(&self.record);
        }
    }
}

impl Caller<()> {
    /// Completion without payload.
    pub fn complete(self) {
        self.call(());
    }
}

impl<T> std::fmt::Debug for Caller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller").finish_non_exhaustive()
    }
}

/// A completion handler for operations that report an error alongside
/// their output, shaped like an `(error, value)` callback.
pub struct FallibleCaller<T> {
    record: Arc<CoroRecord>,
    shared: Arc<SlotShared<T>>,
}

impl<T> FallibleCaller<T> {
    /// Stores the outcome and resumes the coroutine. `value` is always
    /// carried, even on error, matching handlers that deliver partial
    /// output (for example a byte count of zero).
    pub fn call(self, error: Option<Error>, value: T) {
        *self.shared.error.lock() = error;
        *self.shared.value.lock() = Some(value);
        if self.shared.arrive() {
            post_resume(&self.record);
        }
    }

    /// Successful completion.
    pub fn succeed(self, value: T) {
        self.call(None, value);
    }
}

impl<T: Default> FallibleCaller<T> {
    /// Failed completion with a default (empty) value.
    pub fn fail(self, error: Error) {
        self.call(Some(error), T::default());
    }
}

impl FallibleCaller<()> {
    /// Completion without payload.
    pub fn complete(self) {
        self.call(None, ());
    }
}

impl<T> std::fmt::Debug for FallibleCaller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallibleCaller").finish_non_exhaustive()
    }
}

fn shared<T>(context: CoroutineContext) -> Arc<SlotShared<T>> {
    Arc::new(SlotShared {
        context,
        value: Mutex::new(None),
        error: Mutex::new(None),
        steps: AtomicU32::new(0),
    })
}

pub(crate) fn pair<T>(
    context: CoroutineContext,
    record: Arc<CoroRecord>,
) -> (Caller<T>, ValueSlot<T>) {
    let shared = shared(context);
    (
        Caller {
            record,
            shared: Arc::clone(&shared),
        },
        ValueSlot { shared },
    )
}

pub(crate) fn fallible_pair<T>(
    context: CoroutineContext,
    record: Arc<CoroRecord>,
) -> (FallibleCaller<T>, ValueSlot<T>) {
    let shared = shared(context);
    (
        FallibleCaller {
            record,
            shared: Arc::clone(&shared),
        },
        ValueSlot { shared },
    )
}
