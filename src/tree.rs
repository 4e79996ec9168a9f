//! Context tree blueprint.
//!
//! A [`ContextTree`] is the mutable description of a scheduler topology:
//! an append-only sequence of node descriptors, each naming its parent,
//! its worker slots, and whether its queue participates in polling. The
//! tree is consumed by [`Scheduler`](crate::scheduler::Scheduler)
//! construction, which realizes it into runtime nodes.
//!
//! Node ids are guaranteed to be the sequence `0, 1, 2, ...` in insertion
//! order; node 0 is the root and every other node's parent precedes it.
//!
//! All blueprint types carry `serde` derives so a topology can be read
//! from configuration.

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies a context (node) within a tree or scheduler.
pub type ContextId = usize;

/// Identifies a worker slot within one context.
pub type WorkerId = usize;

/// How a worker polls a queue (its own, or the queues of a subtree).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPolicy {
    /// Skip the queue entirely.
    Disabled,
    /// Execute at most one ready task per cycle (round-robin friendly).
    DrainOne,
    /// Execute every currently-ready task per cycle.
    #[default]
    DrainAll,
    /// Block until one task has executed or the queue is stopped.
    RunUntilTask,
}

impl PollPolicy {
    /// Parses a policy name leniently: an unknown name yields `fallback`.
    ///
    /// Invalid configuration values are normalized, not rejected, so
    /// workers never need to re-validate their parameters.
    #[must_use]
    pub fn parse_lenient(name: &str, fallback: Self) -> Self {
        match name.trim() {
            "disabled" => Self::Disabled,
            "drain_one" => Self::DrainOne,
            "drain_all" => Self::DrainAll,
            "run_until_task" => Self::RunUntilTask,
            _ => fallback,
        }
    }
}

/// What a worker does after a run of empty polling rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Keep polling. Fastest, burns a core.
    NoDelay,
    /// Yield the thread to the OS scheduler.
    #[default]
    Yield,
    /// Sleep for [`WorkerParams::idle_sleep`].
    Sleep,
}

impl IdlePolicy {
    /// Parses a policy name leniently: an unknown name yields the default.
    #[must_use]
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim() {
            "no_delay" => Self::NoDelay,
            "yield" => Self::Yield,
            "sleep" => Self::Sleep,
            _ => Self::default(),
        }
    }
}

/// Default sleep applied when [`IdlePolicy::Sleep`] is selected.
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(500);

/// Parameters for one worker slot on a context.
///
/// The defaults make a worker fully service its own queue each cycle
/// (`DrainAll`) while round-robining across child queues (`DrainOne`), so
/// no sibling subtree starves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerParams {
    /// How the worker polls its own node's queue.
    pub self_poll: PollPolicy,
    /// How the worker polls each queue in its subtree.
    pub children_poll: PollPolicy,
    /// Consecutive empty polling rounds before the idle policy applies.
    pub idle_rounds: usize,
    /// What to do once `idle_rounds` empty rounds have accumulated.
    pub idle_policy: IdlePolicy,
    /// Sleep length for [`IdlePolicy::Sleep`].
    pub idle_sleep: Duration,
}

impl Default for WorkerParams {
    fn default() -> Self {
        Self {
            self_poll: PollPolicy::DrainAll,
            children_poll: PollPolicy::DrainOne,
            idle_rounds: 1,
            idle_policy: IdlePolicy::Yield,
            idle_sleep: DEFAULT_IDLE_SLEEP,
        }
    }
}

impl WorkerParams {
    /// Returns a copy with out-of-range values replaced by defaults.
    ///
    /// Only `idle_rounds` can be out of range in Rust (the policy enums
    /// are closed); a zero round count becomes 1.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.idle_rounds < 1 {
            self.idle_rounds = 1;
        }
        self
    }
}

/// One node descriptor inside a [`ContextTree`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodeSpec {
    pub(crate) parent: ContextId,
    pub(crate) children: usize,
    pub(crate) workers: Vec<WorkerParams>,
    pub(crate) concurrency_hint: Option<usize>,
    pub(crate) enabled: bool,
}

/// Mutable description of a scheduler topology.
///
/// # Example
///
/// ```
/// use taskgrove::tree::ContextTree;
///
/// let mut tree = ContextTree::new();
/// let root = tree.add_node(0, 1, true)?;
/// let long = tree.add_node(root, 1, true)?;
/// let short = tree.add_node(root, 2, true)?;
/// assert_eq!((root, long, short), (0, 1, 2));
/// # Ok::<(), taskgrove::error::Error>(())
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextTree {
    nodes: Vec<NodeSpec>,
    #[serde(default)]
    defaults: WorkerParams,
}

impl ContextTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tree whose `add_node`/`add_worker` slots start
    /// from `defaults` instead of [`WorkerParams::default`].
    ///
    /// Pairs with
    /// [`SchedulerConfig::worker_defaults`](crate::config::SchedulerConfig).
    #[must_use]
    pub fn with_worker_defaults(defaults: WorkerParams) -> Self {
        Self {
            nodes: Vec::new(),
            defaults: defaults.normalized(),
        }
    }

    /// Appends a node with `workers` default-parameter worker slots.
    ///
    /// The first node added becomes the root; its `parent` must be 0
    /// (the root is its own parent by convention). Every later node's
    /// parent must already exist.
    pub fn add_node(&mut self, parent: ContextId, workers: usize, enabled: bool) -> Result<ContextId> {
        self.add_node_inner(parent, workers, enabled, None)
    }

    /// Like [`ContextTree::add_node`], with an advisory concurrency hint
    /// forwarded to the node's queue.
    pub fn add_node_with_hint(
        &mut self,
        parent: ContextId,
        workers: usize,
        enabled: bool,
        concurrency_hint: usize,
    ) -> Result<ContextId> {
        self.add_node_inner(parent, workers, enabled, Some(concurrency_hint))
    }

    fn add_node_inner(
        &mut self,
        parent: ContextId,
        workers: usize,
        enabled: bool,
        concurrency_hint: Option<usize>,
    ) -> Result<ContextId> {
        let new_id = self.nodes.len();
        if parent >= new_id && parent != 0 {
            return Err(Error::new(ErrorKind::BadId)
                .with_context(format!("parent id {parent} does not precede new node {new_id}")));
        }

        self.nodes.push(NodeSpec {
            parent,
            children: 0,
            workers: vec![self.defaults.clone(); workers],
            concurrency_hint,
            enabled,
        });
        if new_id != 0 {
            self.nodes[parent].children += 1;
        }

        Ok(new_id)
    }

    /// Appends a default-parameter worker slot to a node.
    pub fn add_worker(&mut self, id: ContextId) -> Result<WorkerId> {
        let params = self.defaults.clone();
        self.add_worker_with(id, params)
    }

    /// Appends a worker slot with explicit parameters to a node.
    ///
    /// Parameters are normalized on the way in.
    pub fn add_worker_with(&mut self, id: ContextId, params: WorkerParams) -> Result<WorkerId> {
        let node = self.node_mut(id)?;
        let worker_id = node.workers.len();
        node.workers.push(params.normalized());
        Ok(worker_id)
    }

    /// Replaces the parameters of an existing worker slot.
    pub fn set_worker_params(
        &mut self,
        id: ContextId,
        slot: WorkerId,
        params: WorkerParams,
    ) -> Result<()> {
        let node = self.node_mut(id)?;
        let entry = node.workers.get_mut(slot).ok_or_else(|| {
            Error::new(ErrorKind::BadId).with_context(format!("worker slot {slot} on context {id}"))
        })?;
        *entry = params.normalized();
        Ok(())
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no nodes were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total number of worker slots across all nodes.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.nodes.iter().map(|n| n.workers.len()).sum()
    }

    pub(crate) fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    fn node_mut(&mut self, id: ContextId) -> Result<&mut NodeSpec> {
        let len = self.nodes.len();
        self.nodes.get_mut(id).ok_or_else(|| {
            Error::new(ErrorKind::BadId)
                .with_context(format!("context id {id} out of range (have {len})"))
        })
    }
}
