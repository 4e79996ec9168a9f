//! Taskgrove: a hierarchical multi-executor task scheduler with
//! work-stealing by parent workers.
//!
//! # Overview
//!
//! An application partitions its asynchronous work across a tree of task
//! queues ("contexts"). Each context owns a configurable pool of worker
//! threads, and workers at internal nodes additionally drain the queues
//! of the whole subtree below them. The canonical shape: one context for
//! long tasks, one for short tasks, and a parent whose workers poll both
//! — short tasks never starve, yet spare capacity is still donated to
//! long tasks.
//!
//! A cooperative coroutine facility integrates with asynchronous
//! operations: a completion handler produced from a coroutine's context
//! stores the operation's output and resumes the suspended body through a
//! per-coroutine serializer, so each coroutine is single-threaded while
//! coroutines progress in parallel.
//!
//! # Module Structure
//!
//! - [`tree`]: blueprint of the context topology and worker parameters
//! - [`scheduler`]: lifecycle (start/stop/join), node realization, workers
//! - [`queue`]: the FIFO task queue primitive and the [`queue::Serializer`]
//! - [`coro`]: coroutines, completion bridge, promise/future pair
//! - [`group`]: round-robin selection over a set of queues
//! - [`config`]: scheduler configuration with environment overrides
//! - [`error`]: error types
//! - [`test_utils`]: logging and probing helpers for tests
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use taskgrove::scheduler::Scheduler;
//! use taskgrove::tree::ContextTree;
//!
//! let mut tree = ContextTree::new();
//! let root = tree.add_node(0, 1, true)?;
//! let workers = tree.add_node(root, 2, true)?;
//!
//! let scheduler = Scheduler::new(&tree)?;
//! scheduler.start()?;
//!
//! let done = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&done);
//! scheduler.get_queue(workers)?.post(move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! while done.load(Ordering::SeqCst) == 0 {
//!     std::thread::yield_now();
//! }
//! scheduler.stop();
//! # Ok::<(), taskgrove::error::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coro;
pub mod error;
pub mod group;
pub mod queue;
pub mod scheduler;
pub mod test_utils;
pub mod tree;

// Re-exports for convenient access to core types
pub use config::{PanicResponse, SchedulerConfig};
pub use coro::{
    run_until_complete, run_until_complete_with_step, spawn, spawn_with_future, Caller,
    CoroutineContext, CoroutineFuture, CoroutinePromise, CoroutineState, ErrorCapture,
    FallibleCaller, FutureStatus, ValueSlot,
};
pub use error::{Error, ErrorKind, PanicPayload, Result};
pub use group::ContextGroup;
pub use queue::{PinToken, Serializer, Task, TaskQueue};
pub use scheduler::{PanicHook, Scheduler, SchedulerBuilder, SchedulerState};
pub use tree::{ContextId, ContextTree, IdlePolicy, PollPolicy, WorkerId, WorkerParams};
