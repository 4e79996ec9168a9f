//! Scheduler lifecycle and tree realization.
//!
//! The [`Scheduler`] realizes a [`ContextTree`] blueprint into runtime
//! nodes (one queue + worker pool per context) and drives the lifecycle
//! state machine `idle → starting → running → stopping → idle`.
//!
//! Startup pins and launches leaves first: when a parent worker begins
//! polling its subtree, every descendant queue is already pinned, so none
//! can observe momentary emptiness and declare itself finished before its
//! first real task arrives. Stop releases every pin, marks every queue
//! stopped, then joins the workers.
//!
//! - [`worker`]: the per-thread drain loop

mod node;
pub(crate) mod worker;

use crate::config::{PanicResponse, SchedulerConfig};
use crate::error::{Error, ErrorKind, PanicPayload, Result};
use crate::queue::TaskQueue;
use crate::tree::{ContextId, ContextTree};
use node::Node;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SchedulerState {
    /// Constructed, no workers running.
    Idle = 0,
    /// `start` is pinning queues and launching workers.
    Starting = 1,
    /// Workers are live.
    Running = 2,
    /// `stop` is tearing workers down.
    Stopping = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

/// Function invoked with every panic caught at a worker boundary.
///
/// Must be thread-safe; a hook that itself panics terminates the worker
/// that called it.
pub type PanicHook = Arc<dyn Fn(&PanicPayload) + Send + Sync + 'static>;

/// State shared between the scheduler handle and its worker threads.
pub(crate) struct Shared {
    pub(crate) nodes: Box<[Node]>,
    state: AtomicU8,
    pub(crate) panic_hook: Option<PanicHook>,
    pub(crate) panic_response: PanicResponse,
    thread_prefix: String,
}

impl Shared {
    pub(crate) fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Breadth-first ordering of all nodes from the root.
    fn bfs_order(&self) -> Vec<ContextId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = vec![false; self.nodes.len()];
        order.push(0);
        visited[0] = true;

        let mut head = 0;
        while head < order.len() {
            let id = order[head];
            head += 1;
            for &child in &self.nodes[id].children {
                if !visited[child] {
                    visited[child] = true;
                    order.push(child);
                }
            }
        }
        order
    }

    /// Breadth-first ordering of the strict descendants of `id`.
    pub(crate) fn descendants(&self, id: ContextId) -> Vec<ContextId> {
        let mut out = self.nodes[id].children.clone();
        let mut head = 0;
        while head < out.len() {
            let current = out[head];
            head += 1;
            out.extend_from_slice(&self.nodes[current].children);
        }
        out
    }
}

/// Builder for a [`Scheduler`].
///
/// # Example
///
/// ```
/// use taskgrove::scheduler::Scheduler;
/// use taskgrove::tree::ContextTree;
///
/// let mut tree = ContextTree::new();
/// tree.add_node(0, 1, true)?;
/// let scheduler = Scheduler::builder(tree).build()?;
/// scheduler.start()?;
/// scheduler.stop();
/// # Ok::<(), taskgrove::error::Error>(())
/// ```
pub struct SchedulerBuilder {
    tree: ContextTree,
    config: SchedulerConfig,
    panic_hook: Option<PanicHook>,
    start_immediately: bool,
}

impl SchedulerBuilder {
    /// Creates a builder for the given blueprint.
    #[must_use]
    pub fn new(tree: ContextTree) -> Self {
        Self {
            tree,
            config: SchedulerConfig::default(),
            panic_hook: None,
            start_immediately: false,
        }
    }

    /// Replaces the scheduler configuration.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs a hook invoked with every panic caught at a worker
    /// boundary. Without a hook, panics follow
    /// [`SchedulerConfig::panic_response`].
    #[must_use]
    pub fn panic_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PanicPayload) + Send + Sync + 'static,
    {
        self.panic_hook = Some(Arc::new(hook));
        self
    }

    /// Starts the scheduler as part of [`SchedulerBuilder::build`].
    #[must_use]
    pub fn start_immediately(mut self, yes: bool) -> Self {
        self.start_immediately = yes;
        self
    }

    /// Realizes the blueprint into a scheduler.
    pub fn build(self) -> Result<Scheduler> {
        let mut config = self.config;
        config.normalize();

        let specs = self.tree.nodes();
        let mut nodes: Vec<Node> = specs.iter().map(Node::from_spec).collect();
        for (id, spec) in specs.iter().enumerate().skip(1) {
            nodes[spec.parent].children.push(id);
        }

        let scheduler = Scheduler {
            shared: Arc::new(Shared {
                nodes: nodes.into_boxed_slice(),
                state: AtomicU8::new(SchedulerState::Idle as u8),
                panic_hook: self.panic_hook,
                panic_response: config.panic_response,
                thread_prefix: config.thread_name_prefix,
            }),
            lifecycle: Mutex::new(()),
            join_lock: Mutex::new(()),
            joining: AtomicBool::new(false),
        };

        if self.start_immediately {
            scheduler.start()?;
        }
        Ok(scheduler)
    }
}

/// Top-level object holding the node array and lifecycle state.
///
/// Dropping a running scheduler stops it first, so workers never outlive
/// the node array they poll.
pub struct Scheduler {
    shared: Arc<Shared>,
    lifecycle: Mutex<()>,
    join_lock: Mutex<()>,
    joining: AtomicBool,
}

impl Scheduler {
    /// Creates a stopped scheduler from a blueprint with default
    /// configuration and no panic hook.
    pub fn new(tree: &ContextTree) -> Result<Self> {
        Self::builder(tree.clone()).build()
    }

    /// Returns a builder for the given blueprint.
    #[must_use]
    pub fn builder(tree: ContextTree) -> SchedulerBuilder {
        SchedulerBuilder::new(tree)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// Returns true if [`Scheduler::join`] would currently block instead
    /// of erroring.
    #[must_use]
    pub fn is_joinable(&self) -> bool {
        self.shared.state() == SchedulerState::Running && !self.joining.load(Ordering::Acquire)
    }

    /// Number of contexts in the scheduler.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.shared.nodes.len()
    }

    /// Total number of worker slots across all contexts.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.nodes.iter().map(|n| n.workers.len()).sum()
    }

    /// Returns the queue of the context with the given id.
    pub fn get_queue(&self, id: ContextId) -> Result<Arc<TaskQueue>> {
        let count = self.shared.nodes.len();
        self.shared.nodes.get(id).map(|n| Arc::clone(&n.queue)).ok_or_else(|| {
            Error::new(ErrorKind::BadId)
                .with_context(format!("context id {id} out of range (have {count})"))
        })
    }

    /// Pins every queue and launches every configured worker, leaves
    /// first.
    ///
    /// Fails with [`ErrorKind::InvalidState`] unless the scheduler is
    /// idle. On a worker spawn failure, everything already launched is
    /// torn back down and the error is returned; the scheduler is idle
    /// again afterwards.
    pub fn start(&self) -> Result<()> {
        if self.shared.nodes.is_empty() {
            return Ok(());
        }

        let _lifecycle = self.lifecycle.lock();
        if self.shared.state() != SchedulerState::Idle {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_context("start requires an idle scheduler"));
        }

        self.shared.set_state(SchedulerState::Starting);
        if let Err(e) = self.start_workers() {
            self.shared.set_state(SchedulerState::Stopping);
            self.release_and_stop_queues();
            self.join_workers();
            return Err(e);
        }
        self.shared.set_state(SchedulerState::Running);
        tracing::info!(
            contexts = self.context_count(),
            workers = self.worker_count(),
            "scheduler running"
        );
        Ok(())
    }

    /// Stops the scheduler: releases every pin token, marks every queue
    /// stopped, joins the workers.
    ///
    /// Idempotent and safe to call from several threads at once; at most
    /// one caller performs the teardown. When called from one of the
    /// scheduler's own workers, the calling worker's thread is skipped
    /// during the join and exits on its own shortly after.
    pub fn stop(&self) {
        if self.shared.nodes.is_empty() {
            return;
        }

        let _lifecycle = self.lifecycle.lock();
        if self.shared.state() == SchedulerState::Idle {
            return;
        }

        self.shared.set_state(SchedulerState::Stopping);
        self.release_and_stop_queues();
        self.join_workers();
        tracing::info!("scheduler stopped");
    }

    /// Blocks the caller until another thread calls [`Scheduler::stop`].
    ///
    /// Fails with [`ErrorKind::InvalidState`] if the scheduler is not
    /// running, or if another thread is already joining.
    pub fn join(&self) -> Result<()> {
        if self.shared.state() != SchedulerState::Running || !self.join_workers() {
            return Err(Error::new(ErrorKind::InvalidState).with_context("scheduler is not joinable"));
        }
        Ok(())
    }

    fn start_workers(&self) -> Result<()> {
        let order = self.shared.bfs_order();
        for &id in order.iter().rev() {
            let node = &self.shared.nodes[id];
            node.queue.restart();
            *node.pin.lock() = Some(TaskQueue::pin(&node.queue));

            for (slot, params) in node.workers.iter().enumerate() {
                let shared = Arc::clone(&self.shared);
                let params = params.clone();
                let name = format!("{}-{id}-{slot}", self.shared.thread_prefix);
                let handle = thread::Builder::new()
                    .name(name)
                    .spawn(move || worker::run(&shared, id, slot, &params))
                    .map_err(|e| {
                        Error::new(ErrorKind::ThreadSpawn)
                            .with_context(format!("worker {slot} of context {id}"))
                            .with_source(e)
                    })?;
                node.threads.lock().push(handle);
            }
        }
        Ok(())
    }

    fn release_and_stop_queues(&self) {
        for node in self.shared.nodes.iter() {
            *node.pin.lock() = None;
        }
        for node in self.shared.nodes.iter() {
            node.queue.stop();
        }
    }

    /// Joins every worker thread. Returns false if another thread is
    /// already joining (that thread will finish the teardown).
    fn join_workers(&self) -> bool {
        if self.joining.swap(true, Ordering::AcqRel) {
            return false;
        }

        let _join = self.join_lock.lock();
        let current = thread::current().id();
        for node in self.shared.nodes.iter() {
            let handles: Vec<_> = node.threads.lock().drain(..).collect();
            for handle in handles {
                if handle.thread().id() == current {
                    // Self-stop: our own thread exits once its loop
                    // observes `Stopping`; detach instead of deadlocking.
                    drop(handle);
                } else if handle.join().is_err() {
                    tracing::error!("worker thread terminated by a panicking panic hook");
                }
            }
        }
        self.joining.store(false, Ordering::Release);
        self.shared.set_state(SchedulerState::Idle);
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("contexts", &self.context_count())
            .field("workers", &self.worker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn chain_tree(depth: usize) -> ContextTree {
        let mut tree = ContextTree::new();
        let mut parent = tree.add_node(0, 1, true).expect("root");
        for _ in 1..depth {
            parent = tree.add_node(parent, 1, true).expect("node");
        }
        tree
    }

    #[test]
    fn empty_tree_start_stop_are_noops() {
        let scheduler = Scheduler::new(&ContextTree::new()).expect("build");
        scheduler.start().expect("start");
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn start_transitions_to_running_and_stop_back_to_idle() {
        let scheduler = Scheduler::new(&chain_tree(2)).expect("build");
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.start().expect("start");
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn start_twice_is_rejected() {
        let scheduler = Scheduler::new(&chain_tree(1)).expect("build");
        scheduler.start().expect("start");
        let err = scheduler.start().expect_err("double start");
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        scheduler.stop();
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let scheduler = Scheduler::new(&chain_tree(2)).expect("build");
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn get_queue_rejects_out_of_range_ids() {
        let scheduler = Scheduler::new(&chain_tree(2)).expect("build");
        assert!(scheduler.get_queue(1).is_ok());
        let err = scheduler.get_queue(7).expect_err("bad id");
        assert_eq!(err.kind(), ErrorKind::BadId);
    }

    #[test]
    fn join_errors_when_not_running() {
        let scheduler = Scheduler::new(&chain_tree(1)).expect("build");
        let err = scheduler.join().expect_err("idle join");
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn tasks_posted_before_start_run_after_start() {
        let scheduler = Scheduler::new(&chain_tree(1)).expect("build");
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        scheduler
            .get_queue(0)
            .expect("queue")
            .post(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });

        scheduler.start().expect("start");
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while hits.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        scheduler.stop();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_stop_pairs_are_repeatable() {
        let scheduler = Scheduler::new(&chain_tree(3)).expect("build");
        for _ in 0..3 {
            scheduler.start().expect("start");
            scheduler.stop();
            assert_eq!(scheduler.state(), SchedulerState::Idle);
        }
    }

    #[test]
    fn bfs_order_visits_parents_before_children() {
        let mut tree = ContextTree::new();
        let root = tree.add_node(0, 0, true).expect("root");
        let a = tree.add_node(root, 0, true).expect("a");
        let b = tree.add_node(root, 0, true).expect("b");
        tree.add_node(a, 0, true).expect("a1");
        tree.add_node(b, 0, true).expect("b1");

        let scheduler = Scheduler::new(&tree).expect("build");
        let order = scheduler.shared.bfs_order();
        assert_eq!(order.len(), 5);
        let position = |id: ContextId| order.iter().position(|&n| n == id).expect("in order");
        for (id, spec) in tree.nodes().iter().enumerate().skip(1) {
            assert!(position(spec.parent) < position(id));
        }
    }

    #[test]
    fn descendants_cover_the_whole_subtree() {
        let mut tree = ContextTree::new();
        let root = tree.add_node(0, 0, true).expect("root");
        let a = tree.add_node(root, 0, true).expect("a");
        let b = tree.add_node(root, 0, true).expect("b");
        let a1 = tree.add_node(a, 0, true).expect("a1");

        let scheduler = Scheduler::new(&tree).expect("build");
        let mut descendants = scheduler.shared.descendants(root);
        descendants.sort_unstable();
        assert_eq!(descendants, vec![a, b, a1]);
        assert!(scheduler.shared.descendants(b).is_empty());
    }
}
