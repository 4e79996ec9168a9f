//! The worker loop.
//!
//! Each worker thread services one worker slot of one context. At entry it
//! classifies itself: its own queue (unless self-polling is disabled or
//! the node is disabled) plus the queues of every enabled descendant in
//! breadth-first order (unless children-polling is disabled).
//!
//! With exactly one queue to service, the worker leans on the queue's own
//! blocking `run_until_stopped`, which matches the efficiency of a bare
//! executor. With several queues it cycles: one self-drain, then one
//! child-drain per descendant in order, counting tasks executed; after
//! `idle_rounds` consecutive empty cycles the idle policy applies.
//!
//! Panics from user tasks are caught here and forwarded to the
//! scheduler's panic hook; the worker keeps going. A hook that itself
//! panics terminates the worker.

use super::Shared;
use crate::config::PanicResponse;
use crate::error::PanicPayload;
use crate::queue::TaskQueue;
use crate::tree::{ContextId, IdlePolicy, PollPolicy, WorkerId, WorkerParams};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

pub(crate) fn run(shared: &Arc<Shared>, id: ContextId, slot: WorkerId, params: &WorkerParams) {
    let node = &shared.nodes[id];

    let self_queue = if params.self_poll != PollPolicy::Disabled && node.enabled {
        Some(Arc::clone(&node.queue))
    } else {
        None
    };

    let child_queues: Vec<Arc<TaskQueue>> = if params.children_poll == PollPolicy::Disabled {
        Vec::new()
    } else {
        shared
            .descendants(id)
            .into_iter()
            .filter(|&d| shared.nodes[d].enabled)
            .map(|d| Arc::clone(&shared.nodes[d].queue))
            .collect()
    };

    tracing::debug!(
        context = id,
        slot,
        children = child_queues.len(),
        "worker started"
    );

    match (&self_queue, child_queues.len()) {
        (None, 0) => {}
        (Some(queue), 0) => run_single(shared, params, queue),
        (None, 1) => {
            if let Some(queue) = child_queues.first() {
                run_single(shared, params, queue);
            }
        }
        _ => run_multi(shared, params, self_queue.as_deref(), &child_queues),
    }

    tracing::debug!(context = id, slot, "worker stopped");
}

/// True while the worker should keep its loop alive.
///
/// `Idle` counts as shutdown too: a self-stop (stop called from a task on
/// this very worker) completes the join and reaches `Idle` before this
/// worker's loop re-checks the state.
fn should_run(shared: &Shared) -> bool {
    matches!(
        shared.state(),
        super::SchedulerState::Starting | super::SchedulerState::Running
    )
}

/// One queue to service: hand the thread to the queue's blocking drain.
fn run_single(shared: &Shared, params: &WorkerParams, queue: &TaskQueue) {
    let mut wait_rounds = 0usize;
    while should_run(shared) {
        if wait_rounds >= params.idle_rounds {
            wait_rounds = 0;
            idle_delay(params);
        }

        guarded(shared, || queue.run_until_stopped());
        if queue.is_stopped() {
            wait_rounds += 1;
        }
    }
}

/// Several queues to service: cycle self-drain then child-drains.
fn run_multi(
    shared: &Shared,
    params: &WorkerParams,
    self_queue: Option<&TaskQueue>,
    child_queues: &[Arc<TaskQueue>],
) {
    let mut wait_rounds = 0usize;
    while should_run(shared) {
        if wait_rounds >= params.idle_rounds {
            wait_rounds = 0;
            idle_delay(params);
        }

        let mut executed = 0;
        if let Some(queue) = self_queue {
            executed += guarded(shared, || poll(queue, params.self_poll));
        }
        for queue in child_queues {
            executed += guarded(shared, || poll(queue, params.children_poll));
        }

        if executed == 0 {
            wait_rounds += 1;
        }
    }
}

fn poll(queue: &TaskQueue, policy: PollPolicy) -> usize {
    match policy {
        PollPolicy::Disabled => 0,
        PollPolicy::DrainOne => queue.drain_one(),
        PollPolicy::DrainAll => queue.drain_all(),
        PollPolicy::RunUntilTask => queue.run_until_task(),
    }
}

/// Runs one drain call with panic containment.
fn guarded(shared: &Shared, drain: impl FnOnce() -> usize) -> usize {
    match catch_unwind(AssertUnwindSafe(drain)) {
        Ok(executed) => executed,
        Err(unwind) => {
            let payload = PanicPayload::from_unwind(unwind.as_ref());
            if let Some(hook) = &shared.panic_hook {
                hook(&payload);
            } else if shared.panic_response == PanicResponse::Log {
                tracing::error!(%payload, "task panicked");
            }
            0
        }
    }
}

fn idle_delay(params: &WorkerParams) {
    match params.idle_policy {
        IdlePolicy::NoDelay => {}
        IdlePolicy::Yield => thread::yield_now(),
        IdlePolicy::Sleep => thread::sleep(params.idle_sleep),
    }
}
