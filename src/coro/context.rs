//! Coroutine records and the `CoroutineContext` handle.
//!
//! A coroutine is a body of blocking-style code that suspends at
//! completion-handler boundaries. Safe Rust has no split-stack facility,
//! so each coroutine owns a dedicated OS thread that parks between
//! resumptions; a two-sided rendezvous (the [`Shuttle`]) hands the CPU
//! back and forth the way a stackful continuation swap would. Resumptions
//! are always posted through the coroutine's serializer, so the rendezvous
//! is touched by at most one resumer at a time.
//!
//! The record is jointly owned by the serializer's posted resume closure
//! and by in-flight completion handlers. A [`CoroutineContext`] held by
//! user code is a weak reference; using it after the record is gone fails
//! with [`ErrorKind::CoroutineExpired`](crate::error::ErrorKind).
//!
//! When the last strong reference drops while the coroutine is parked
//! (its pending operation will never fire), the record's `Drop` wakes the
//! thread with a cancellation flag; the body unwinds, running every
//! on-stack `Drop` exactly once, and the thread exits.

use crate::error::{Error, ErrorKind, PanicPayload, Result};
use crate::queue::{Serializer, TaskQueue};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use super::slot::ErrorCapture;

/// Observable execution state of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CoroutineState {
    /// Created, user code has not run yet.
    Fresh = 0,
    /// Resumable: a resume is posted or a suspension is pending.
    Ready = 1,
    /// Running on some worker right now.
    OnCpu = 2,
    /// Returned or terminated by panic.
    Finished = 3,
}

impl CoroutineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::OnCpu,
            3 => Self::Finished,
            _ => Self::Fresh,
        }
    }
}

/// Panic payload used to unwind a cancelled coroutine's stack.
pub(crate) struct CancelUnwind;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Turn {
    Caller,
    Coroutine,
}

struct ShuttleState {
    turn: Turn,
    finished: bool,
    cancelled: bool,
    panic: Option<PanicPayload>,
}

/// Two-sided rendezvous between a resumer and the coroutine thread.
///
/// Exactly one side owns the CPU at a time; `turn` says which. Kept in a
/// separate `Arc` from the record so the record's `Drop` can still signal
/// the parked thread.
pub(crate) struct Shuttle {
    state: Mutex<ShuttleState>,
    to_coroutine: Condvar,
    to_caller: Condvar,
}

impl Shuttle {
    fn new() -> Self {
        Self {
            state: Mutex::new(ShuttleState {
                turn: Turn::Caller,
                finished: false,
                cancelled: false,
                panic: None,
            }),
            to_coroutine: Condvar::new(),
            to_caller: Condvar::new(),
        }
    }

    /// Resumer side: hand the CPU to the coroutine, block until it yields
    /// or finishes. Returns the finished flag and any captured panic.
    fn resume(&self) -> (bool, Option<PanicPayload>) {
        let mut state = self.state.lock();
        if state.finished {
            return (true, state.panic.take());
        }
        state.turn = Turn::Coroutine;
        self.to_coroutine.notify_one();
        while state.turn == Turn::Coroutine {
            self.to_caller.wait(&mut state);
        }
        (state.finished, state.panic.take())
    }

    /// Coroutine side: yield the CPU back, block until the next resume.
    ///
    /// Unwinds with [`CancelUnwind`] if the record was dropped while
    /// parked.
    pub(crate) fn park(&self) {
        let mut state = self.state.lock();
        state.turn = Turn::Caller;
        self.to_caller.notify_one();
        while state.turn == Turn::Caller {
            self.to_coroutine.wait(&mut state);
        }
        let cancelled = state.cancelled;
        drop(state);
        if cancelled {
            std::panic::panic_any(CancelUnwind);
        }
    }

    /// Coroutine side, first entry: wait for the initial resume without
    /// yielding (the record starts with the caller holding the turn).
    /// Returns false if the record was dropped before the first resume.
    fn wait_first(&self) -> bool {
        let mut state = self.state.lock();
        while state.turn == Turn::Caller {
            self.to_coroutine.wait(&mut state);
        }
        !state.cancelled
    }

    /// Coroutine side: record termination and release the resumer.
    fn finish(&self, panic: Option<PanicPayload>) {
        let mut state = self.state.lock();
        state.finished = true;
        state.panic = panic;
        state.turn = Turn::Caller;
        drop(state);
        self.to_caller.notify_one();
    }

    /// Record side: wake a parked coroutine so it can unwind and exit.
    fn cancel(&self) {
        let mut state = self.state.lock();
        if state.finished || state.cancelled {
            return;
        }
        state.cancelled = true;
        state.turn = Turn::Coroutine;
        drop(state);
        self.to_coroutine.notify_one();
    }
}

/// The shared coroutine record.
pub(crate) struct CoroRecord {
    serializer: Serializer,
    shuttle: Arc<Shuttle>,
    state: AtomicU8,
}

impl CoroRecord {
    pub(crate) fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    pub(crate) fn shuttle(&self) -> &Arc<Shuttle> {
        &self.shuttle
    }

    fn set_state(&self, state: CoroutineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn state(&self) -> CoroutineState {
        CoroutineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// One resumption: swap the CPU in, swap it back out.
    ///
    /// Called from the serializer, so at most one step runs at a time. A
    /// panic captured from the body is re-raised here, which carries it to
    /// the worker's panic containment exactly like any task panic.
    pub(crate) fn step(&self) {
        if self.state() == CoroutineState::Finished {
            tracing::trace!("resume of a finished coroutine ignored");
            return;
        }
        self.set_state(CoroutineState::OnCpu);
        let (finished, panic) = self.shuttle.resume();
        if finished {
            self.set_state(CoroutineState::Finished);
            if let Some(payload) = panic {
                std::panic::resume_unwind(Box::new(payload.message().to_string()));
            }
        } else {
            self.set_state(CoroutineState::Ready);
        }
    }
}

impl Drop for CoroRecord {
    fn drop(&mut self) {
        self.shuttle.cancel();
    }
}

static COROUTINE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Creates the record and its parked coroutine thread.
///
/// The body does not run yet; it waits for the first resume, so the
/// caller's `spawn` returns before the body's first statement.
pub(crate) fn spawn_record(
    serializer: Serializer,
    body: impl FnOnce(CoroutineContext) + Send + 'static,
) -> Result<Arc<CoroRecord>> {
    let shuttle = Arc::new(Shuttle::new());
    let record = Arc::new(CoroRecord {
        serializer,
        shuttle: Arc::clone(&shuttle),
        state: AtomicU8::new(CoroutineState::Fresh as u8),
    });
    let context = CoroutineContext {
        record: Arc::downgrade(&record),
        capture: None,
    };

    let seq = COROUTINE_SEQ.fetch_add(1, Ordering::Relaxed);
    thread::Builder::new()
        .name(format!("taskgrove-coro-{seq}"))
        .spawn(move || coroutine_main(&shuttle, context, body))
        .map_err(|e| {
            Error::new(ErrorKind::ThreadSpawn)
                .with_context("coroutine thread")
                .with_source(e)
        })?;

    tracing::trace!(coroutine = seq, "coroutine spawned");
    Ok(record)
}

/// Posts one resumption of the coroutine through its serializer.
pub(crate) fn post_resume(record: &Arc<CoroRecord>) {
    record.set_state(CoroutineState::Ready);
    let owned = Arc::clone(record);
    record.serializer().post(move || owned.step());
}

fn coroutine_main(
    shuttle: &Arc<Shuttle>,
    context: CoroutineContext,
    body: impl FnOnce(CoroutineContext),
) {
    if !shuttle.wait_first() {
        return;
    }
    match catch_unwind(AssertUnwindSafe(move || body(context))) {
        Ok(()) => shuttle.finish(None),
        Err(unwind) => {
            if unwind.is::<CancelUnwind>() {
                // Record already gone; nobody is waiting on the shuttle.
                return;
            }
            shuttle.finish(Some(PanicPayload::from_unwind(unwind.as_ref())));
        }
    }
}

/// Weak handle to a coroutine, passed to the coroutine body.
///
/// Cheap to clone. All operations fail with
/// [`ErrorKind::CoroutineExpired`](crate::error::ErrorKind) once the
/// record is gone.
#[derive(Clone)]
pub struct CoroutineContext {
    record: Weak<CoroRecord>,
    capture: Option<ErrorCapture>,
}

impl CoroutineContext {
    pub(crate) fn lock(&self) -> Result<Arc<CoroRecord>> {
        self.record
            .upgrade()
            .ok_or_else(|| Error::new(ErrorKind::CoroutineExpired))
    }

    /// Returns the serializer this coroutine resumes through.
    pub fn executor(&self) -> Result<Serializer> {
        Ok(self.lock()?.serializer().clone())
    }

    /// Returns the queue underlying this coroutine's serializer.
    pub fn queue(&self) -> Result<Arc<TaskQueue>> {
        Ok(Arc::clone(self.lock()?.serializer().queue()))
    }

    /// Returns the coroutine's current execution state.
    pub fn state(&self) -> Result<CoroutineState> {
        Ok(self.lock()?.state())
    }

    /// Creates a completion bridge: a handler to give to an asynchronous
    /// operation and the slot this coroutine will await.
    ///
    /// ```no_run
    /// # fn demo(context: taskgrove::coro::CoroutineContext) -> taskgrove::error::Result<()> {
    /// let (caller, value) = context.get_caller::<u64>()?;
    /// std::thread::spawn(move || caller.call(42));
    /// assert_eq!(value.get()?, 42);
    /// # Ok(())
    /// # }
    /// ```
    pub fn get_caller<T>(&self) -> Result<(super::slot::Caller<T>, super::slot::ValueSlot<T>)> {
        let record = self.lock()?;
        Ok(super::slot::pair(self.clone(), record))
    }

    /// Like [`CoroutineContext::get_caller`], for operations that report
    /// an error alongside their output.
    pub fn get_fallible_caller<T>(
        &self,
    ) -> Result<(super::slot::FallibleCaller<T>, super::slot::ValueSlot<T>)> {
        let record = self.lock()?;
        Ok(super::slot::fallible_pair(self.clone(), record))
    }

    /// Returns a handle that routes completion errors into `capture`
    /// instead of raising them from [`ValueSlot::get`].
    ///
    /// [`ValueSlot::get`]: super::slot::ValueSlot::get
    #[must_use]
    pub fn capture_errors(&self, capture: &ErrorCapture) -> Self {
        Self {
            record: self.record.clone(),
            capture: Some(capture.clone()),
        }
    }

    pub(crate) fn error_capture(&self) -> Option<&ErrorCapture> {
        self.capture.as_ref()
    }

    /// Suspends the coroutine until the next resume.
    ///
    /// Must only be called from the coroutine's own thread. Ownership of
    /// the record is not held across the suspension, so a coroutine whose
    /// pending operation never fires can still be cancelled.
    pub(crate) fn suspend(&self) -> Result<()> {
        let record = self.lock()?;
        let shuttle = Arc::clone(record.shuttle());
        drop(record);
        shuttle.park();
        Ok(())
    }
}

impl std::fmt::Debug for CoroutineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.record.upgrade().map(|r| r.state());
        f.debug_struct("CoroutineContext")
            .field("state", &state)
            .field("captures_errors", &self.capture.is_some())
            .finish()
    }
}
