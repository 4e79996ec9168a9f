//! Runtime context node.

use crate::queue::{PinToken, TaskQueue};
use crate::tree::{ContextId, NodeSpec, WorkerParams};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// One realized context: a queue, its subtree edges, its worker slots,
/// and the live worker threads.
///
/// The children list is wired during scheduler construction and frozen
/// thereafter; workers read it without locking. The pin and thread slots
/// are only written under the scheduler's lifecycle/join locks.
pub(crate) struct Node {
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) children: Vec<ContextId>,
    pub(crate) workers: Vec<WorkerParams>,
    pub(crate) enabled: bool,
    pub(crate) pin: Mutex<Option<PinToken>>,
    pub(crate) threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub(crate) fn from_spec(spec: &NodeSpec) -> Self {
        let queue = match spec.concurrency_hint {
            Some(hint) => TaskQueue::with_hint(hint),
            None => TaskQueue::new(),
        };
        Self {
            queue,
            children: Vec::with_capacity(spec.children),
            workers: spec.workers.clone(),
            enabled: spec.enabled,
            pin: Mutex::new(None),
            threads: Mutex::new(Vec::with_capacity(spec.workers.len())),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("children", &self.children)
            .field("workers", &self.workers.len())
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
