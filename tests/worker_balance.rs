//! Subtree draining and fairness of the worker loop.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskgrove::test_utils::init_test_logging;
use taskgrove::tree::{ContextTree, IdlePolicy, PollPolicy, WorkerParams};
use taskgrove::Scheduler;

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let limit = Instant::now() + deadline;
    while Instant::now() < limit {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    done()
}

/// A single parent worker with `drain_one` children polling alternates
/// between two saturated child queues: in every prefix of the execution
/// log the two children differ by at most one task.
#[test]
fn drain_one_children_polling_is_fair() {
    init_test_logging();

    let mut tree = ContextTree::new();
    let root = tree.add_node(0, 0, true).expect("root");
    tree.add_worker_with(
        root,
        WorkerParams {
            self_poll: PollPolicy::Disabled,
            children_poll: PollPolicy::DrainOne,
            idle_policy: IdlePolicy::Yield,
            ..WorkerParams::default()
        },
    )
    .expect("worker");
    let left = tree.add_node(root, 0, true).expect("left");
    let right = tree.add_node(root, 0, true).expect("right");

    let scheduler = Scheduler::new(&tree).expect("build");
    let log: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    const PER_CHILD: usize = 50;

    for (tag, id) in [(0usize, left), (1usize, right)] {
        let queue = scheduler.get_queue(id).expect("queue");
        for _ in 0..PER_CHILD {
            let log = Arc::clone(&log);
            queue.post(move || log.lock().push(tag));
        }
    }

    scheduler.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || {
        log.lock().len() == PER_CHILD * 2
    }));
    scheduler.stop();

    let order = log.lock();
    let mut counts = [0i64, 0i64];
    for &tag in order.iter() {
        counts[tag] += 1;
        assert!(
            (counts[0] - counts[1]).abs() <= 1,
            "unfair prefix: {counts:?}"
        );
    }
}

/// `drain_all` children polling lets a parent fully clear one child per
/// cycle; everything still executes exactly once.
#[test]
fn drain_all_children_polling_executes_everything_once() {
    init_test_logging();

    let mut tree = ContextTree::new();
    let root = tree.add_node(0, 0, true).expect("root");
    tree.add_worker_with(
        root,
        WorkerParams {
            self_poll: PollPolicy::Disabled,
            children_poll: PollPolicy::DrainAll,
            ..WorkerParams::default()
        },
    )
    .expect("worker");
    let left = tree.add_node(root, 0, true).expect("left");
    let right = tree.add_node(root, 0, true).expect("right");

    let scheduler = Scheduler::new(&tree).expect("build");
    let hits = Arc::new(AtomicUsize::new(0));
    for id in [left, right] {
        let queue = scheduler.get_queue(id).expect("queue");
        for _ in 0..25 {
            let h = Arc::clone(&hits);
            queue.post(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    scheduler.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || {
        hits.load(Ordering::SeqCst) == 50
    }));
    scheduler.stop();
    assert_eq!(hits.load(Ordering::SeqCst), 50);
}

/// A grandparent worker drains its entire subtree, not just direct
/// children.
#[test]
fn parent_worker_drains_the_whole_subtree() {
    init_test_logging();

    let mut tree = ContextTree::new();
    let root = tree.add_node(0, 1, true).expect("root");
    let mid = tree.add_node(root, 0, true).expect("mid");
    let deep = tree.add_node(mid, 0, true).expect("deep");

    let scheduler = Scheduler::new(&tree).expect("build");
    let hits = Arc::new(AtomicUsize::new(0));
    for id in [mid, deep] {
        let queue = scheduler.get_queue(id).expect("queue");
        for _ in 0..5 {
            let h = Arc::clone(&hits);
            queue.post(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    scheduler.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || {
        hits.load(Ordering::SeqCst) == 10
    }));
    scheduler.stop();
}

/// K tasks posted to one queue with one `drain_all` worker execute
/// exactly once, in FIFO order.
#[test]
fn single_drainer_preserves_fifo_order() {
    init_test_logging();

    let mut tree = ContextTree::new();
    let root = tree.add_node(0, 1, true).expect("root");

    let scheduler = Scheduler::new(&tree).expect("build");
    let log: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    const TASKS: usize = 200;

    let queue = scheduler.get_queue(root).expect("queue");
    for i in 0..TASKS {
        let log = Arc::clone(&log);
        queue.post(move || log.lock().push(i));
    }

    scheduler.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || log.lock().len() == TASKS));
    scheduler.stop();

    assert_eq!(*log.lock(), (0..TASKS).collect::<Vec<_>>());
}
