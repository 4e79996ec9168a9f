//! Test utilities for taskgrove.
//!
//! Shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - A counter that records which threads executed tasks

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread::ThreadId;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with debug-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::DEBUG);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Counts task executions and remembers which threads performed them.
#[derive(Default)]
pub struct WorkProbe {
    count: AtomicUsize,
    threads: Mutex<HashSet<ThreadId>>,
}

impl WorkProbe {
    /// Creates a fresh probe.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records one execution on the current thread.
    pub fn hit(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.threads.lock().insert(std::thread::current().id());
    }

    /// Number of recorded executions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Number of distinct threads that recorded executions.
    #[must_use]
    pub fn distinct_threads(&self) -> usize {
        self.threads.lock().len()
    }
}

impl std::fmt::Debug for WorkProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkProbe")
            .field("count", &self.count())
            .field("distinct_threads", &self.distinct_threads())
            .finish()
    }
}
