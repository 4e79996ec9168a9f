//! Round-robin selection over a set of queues.
//!
//! A [`ContextGroup`] hands out queues from a fixed set in rotation,
//! which spreads unrelated work (sockets, sessions, shards) evenly over a
//! few contexts. The group does not own the scheduler; it only keeps the
//! queues alive.

use crate::error::{Error, ErrorKind, Result};
use crate::queue::TaskQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round-robin queue selector.
///
/// Duplicate queues passed at construction are kept once.
///
/// # Example
///
/// ```
/// use taskgrove::group::ContextGroup;
/// use taskgrove::queue::TaskQueue;
///
/// let (q1, q2) = (TaskQueue::new(), TaskQueue::new());
/// let group = ContextGroup::new([q1.clone(), q2.clone()]);
/// assert!(std::sync::Arc::ptr_eq(&group.next()?, &q1));
/// assert!(std::sync::Arc::ptr_eq(&group.next()?, &q2));
/// assert!(std::sync::Arc::ptr_eq(&group.next()?, &q1));
/// # Ok::<(), taskgrove::error::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct ContextGroup {
    index: AtomicUsize,
    queues: Vec<Arc<TaskQueue>>,
}

impl ContextGroup {
    /// Creates a group over the given queues, dropping duplicates.
    #[must_use]
    pub fn new(queues: impl IntoIterator<Item = Arc<TaskQueue>>) -> Self {
        let mut unique: Vec<Arc<TaskQueue>> = Vec::new();
        for queue in queues {
            if !unique.iter().any(|seen| Arc::ptr_eq(seen, &queue)) {
                unique.push(queue);
            }
        }
        Self {
            index: AtomicUsize::new(0),
            queues: unique,
        }
    }

    /// Returns the next queue in rotation.
    ///
    /// Fails with [`ErrorKind::BadId`] on an empty group.
    pub fn next(&self) -> Result<Arc<TaskQueue>> {
        if self.queues.is_empty() {
            return Err(Error::new(ErrorKind::BadId).with_context("empty context group"));
        }
        let slot = self.index.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        Ok(Arc::clone(&self.queues[slot]))
    }

    /// Number of distinct queues in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// True if the group holds no queues.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_repeats_in_order() {
        let (q1, q2, q3) = (TaskQueue::new(), TaskQueue::new(), TaskQueue::new());
        let group = ContextGroup::new([q1.clone(), q2.clone(), q3.clone()]);
        assert_eq!(group.len(), 3);

        let expected = [&q1, &q2, &q3, &q1, &q2, &q3];
        for queue in expected {
            assert!(Arc::ptr_eq(queue, &group.next().expect("queue")));
        }
    }

    #[test]
    fn duplicates_are_dropped() {
        let q = TaskQueue::new();
        let group = ContextGroup::new([q.clone(), q.clone(), q]);
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn empty_group_errors() {
        let group = ContextGroup::new([]);
        assert!(group.is_empty());
        let err = group.next().expect_err("empty group");
        assert_eq!(err.kind(), ErrorKind::BadId);
    }
}
