//! The task queue primitive.
//!
//! A [`TaskQueue`] is a thread-safe FIFO of boxed closures with three
//! nonblocking-or-bounded drain operations (`drain_one`, `drain_all`,
//! `run_until_task`) and a fully blocking `run_until_stopped`. A queue can
//! be *pinned*: while at least one [`PinToken`] is alive, the blocking
//! drain variants do not return just because the queue is momentarily
//! empty. Stopping a queue wakes every blocked drainer.
//!
//! Tasks always execute outside the queue lock, so a task may freely post
//! to the queue it is running on.
//!
//! - [`serializer`]: FIFO, at-most-one-at-a-time execution adapter

pub mod serializer;

pub use serializer::Serializer;

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A unit of work accepted by a [`TaskQueue`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    stopped: bool,
    pins: usize,
}

impl QueueState {
    /// True when a blocking drain should give up waiting.
    fn idle_exit(&self) -> bool {
        self.stopped || (self.pins == 0 && self.tasks.is_empty())
    }
}

/// A FIFO task queue with pinning and stop support.
///
/// Construct through [`TaskQueue::new`] (or [`TaskQueue::with_hint`]) and
/// share via `Arc`; every operation takes `&self`.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    concurrency_hint: Option<usize>,
    /// Tasks executed over the queue's lifetime. Drives nothing; useful in
    /// diagnostics output.
    executed: AtomicUsize,
}

impl TaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Creates an empty queue carrying an advisory concurrency hint.
    ///
    /// The hint mirrors the number of workers expected to drain the queue;
    /// it does not change behavior.
    #[must_use]
    pub fn with_hint(hint: usize) -> Arc<Self> {
        Self::build(Some(hint))
    }

    fn build(concurrency_hint: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
            concurrency_hint,
            executed: AtomicUsize::new(0),
        })
    }

    /// Returns the advisory concurrency hint, if one was given.
    #[must_use]
    pub fn concurrency_hint(&self) -> Option<usize> {
        self.concurrency_hint
    }

    /// Enqueues a task. Thread-safe; never blocks.
    ///
    /// Posting is legal in any queue state. Tasks posted to a stopped
    /// queue stay queued and run after [`TaskQueue::restart`].
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        state.tasks.push_back(Box::new(task));
        drop(state);
        self.ready.notify_one();
    }

    /// Executes at most one ready task. Returns the number executed.
    pub fn drain_one(&self) -> usize {
        match self.pop() {
            Some(task) => {
                self.run(task);
                1
            }
            None => 0,
        }
    }

    /// Executes every task that was ready when the call was made.
    ///
    /// Tasks posted while draining are left for the next call, so a
    /// self-reposting task cannot monopolize the drainer.
    pub fn drain_all(&self) -> usize {
        let ready_now = self.state.lock().tasks.len();
        let mut executed = 0;
        for _ in 0..ready_now {
            match self.pop() {
                Some(task) => {
                    self.run(task);
                    executed += 1;
                }
                None => break,
            }
        }
        executed
    }

    /// Blocks until one task has executed, the queue is stopped, or the
    /// queue is unpinned and empty. Returns the number executed (0 or 1).
    pub fn run_until_task(&self) -> usize {
        loop {
            let mut state = self.state.lock();
            if let Some(task) = state.tasks.pop_front() {
                drop(state);
                self.run(task);
                return 1;
            }
            if state.idle_exit() {
                return 0;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Like [`TaskQueue::run_until_task`], but gives up after `timeout`.
    pub fn run_one_for(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let mut state = self.state.lock();
            if let Some(task) = state.tasks.pop_front() {
                drop(state);
                self.run(task);
                return 1;
            }
            if state.idle_exit() {
                return 0;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return 0;
            }
        }
    }

    /// Runs tasks until the queue is stopped, or unpinned and empty.
    ///
    /// Tasks that are already queued when the stop arrives are still
    /// executed before this returns. Returns the number executed.
    pub fn run_until_stopped(&self) -> usize {
        let mut executed = 0;
        loop {
            let mut state = self.state.lock();
            if let Some(task) = state.tasks.pop_front() {
                drop(state);
                self.run(task);
                executed += 1;
                continue;
            }
            if state.idle_exit() {
                return executed;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Pins the queue against idle exit.
    ///
    /// While any token is alive, blocking drains wait for work instead of
    /// returning on emptiness. Dropping the token re-enables idle exit.
    pub fn pin(queue: &Arc<Self>) -> PinToken {
        queue.state.lock().pins += 1;
        PinToken {
            queue: Arc::clone(queue),
        }
    }

    /// Marks the queue stopped and wakes every blocked drainer.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.ready.notify_all();
    }

    /// Clears the stopped mark so the queue can run again.
    pub fn restart(&self) {
        self.state.lock().stopped = false;
    }

    /// Returns true if [`TaskQueue::stop`] has been called since the last
    /// restart.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Returns the number of queued (not yet executed) tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Returns true if no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }

    /// Total number of tasks this queue has executed.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    fn pop(&self) -> Option<Task> {
        self.state.lock().tasks.pop_front()
    }

    fn run(&self, task: Task) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        task();
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskQueue")
            .field("queued", &state.tasks.len())
            .field("stopped", &state.stopped)
            .field("pins", &state.pins)
            .finish()
    }
}

/// Keeps a [`TaskQueue`] from declaring itself idle-finished.
///
/// Returned by [`TaskQueue::pin`]; dropping the token releases the pin and
/// wakes blocked drainers so they can re-evaluate the exit condition.
pub struct PinToken {
    queue: Arc<TaskQueue>,
}

impl Drop for PinToken {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        state.pins = state.pins.saturating_sub(1);
        let unpinned = state.pins == 0;
        drop(state);
        if unpinned {
            self.queue.ready.notify_all();
        }
    }
}

impl std::fmt::Debug for PinToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinToken").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn post_then_drain_one() {
        let queue = TaskQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        queue.post(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(queue.drain_one(), 1);
        assert_eq!(queue.drain_one(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_all_runs_everything_ready() {
        let queue = TaskQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let h = Arc::clone(&hits);
            queue.post(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(queue.drain_all(), 5);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_all_leaves_reposted_tasks_for_next_call() {
        let queue = TaskQueue::new();
        let inner = Arc::clone(&queue);
        queue.post(move || {
            inner.post(|| {});
        });

        assert_eq!(queue.drain_all(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_all(), 1);
    }

    #[test]
    fn fifo_order_with_single_drainer() {
        let queue = TaskQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16 {
            let log = Arc::clone(&order);
            queue.post(move || log.lock().push(i));
        }

        assert_eq!(queue.drain_all(), 16);
        assert_eq!(*order.lock(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn run_until_task_returns_zero_when_unpinned_and_empty() {
        let queue = TaskQueue::new();
        assert_eq!(queue.run_until_task(), 0);
    }

    #[test]
    fn run_until_task_blocks_while_pinned_until_post() {
        let queue = TaskQueue::new();
        let pin = TaskQueue::pin(&queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.run_until_task())
        };

        thread::sleep(Duration::from_millis(20));
        queue.post(|| {});
        assert_eq!(waiter.join().expect("drainer panicked"), 1);
        drop(pin);
    }

    #[test]
    fn stop_wakes_blocked_drainer() {
        let queue = TaskQueue::new();
        let pin = TaskQueue::pin(&queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.run_until_task())
        };

        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert_eq!(waiter.join().expect("drainer panicked"), 0);
        drop(pin);
    }

    #[test]
    fn pin_release_wakes_blocked_drainer() {
        let queue = TaskQueue::new();
        let pin = TaskQueue::pin(&queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.run_until_stopped())
        };

        thread::sleep(Duration::from_millis(20));
        drop(pin);
        assert_eq!(waiter.join().expect("drainer panicked"), 0);
    }

    #[test]
    fn run_until_stopped_drains_residual_tasks() {
        let queue = TaskQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = Arc::clone(&hits);
            queue.post(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.stop();

        assert_eq!(queue.run_until_stopped(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn run_one_for_times_out() {
        let queue = TaskQueue::new();
        let pin = TaskQueue::pin(&queue);
        let started = Instant::now();
        assert_eq!(queue.run_one_for(Duration::from_millis(30)), 0);
        assert!(started.elapsed() >= Duration::from_millis(30));
        drop(pin);
    }

    #[test]
    fn restart_clears_stop() {
        let queue = TaskQueue::new();
        queue.stop();
        assert!(queue.is_stopped());
        queue.restart();
        assert!(!queue.is_stopped());

        queue.post(|| {});
        assert_eq!(queue.run_until_task(), 1);
    }

    #[test]
    fn posting_to_stopped_queue_keeps_tasks() {
        let queue = TaskQueue::new();
        queue.stop();
        queue.post(|| {});
        assert_eq!(queue.len(), 1);
        queue.restart();
        assert_eq!(queue.drain_all(), 1);
    }

    #[test]
    fn executed_counts_tasks() {
        let queue = TaskQueue::new();
        queue.post(|| {});
        queue.post(|| {});
        queue.drain_all();
        assert_eq!(queue.executed(), 2);
    }
}
