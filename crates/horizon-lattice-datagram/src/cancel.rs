//! Cooperative shutdown primitives shared by the reader and worker threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// A cancellation token for cooperative shutdown.
///
/// Threads check the token at each blocking point and wind down once it is
/// cancelled. Cancelling is one-way.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    ///
    /// Returns `true` if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }
}

/// Counts live pipeline threads so shutdown can wait on them with a deadline.
#[derive(Debug, Default)]
pub(crate) struct ThreadLatch {
    live: Mutex<usize>,
    exited: Condvar,
}

impl ThreadLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a thread. The returned guard unregisters it on drop, which
    /// also covers threads that unwind.
    pub fn enter(self: &Arc<Self>) -> LatchGuard {
        *self.live.lock() += 1;
        LatchGuard {
            latch: Arc::clone(self),
        }
    }

    /// Number of registered threads that have not exited.
    pub fn live(&self) -> usize {
        *self.live.lock()
    }

    /// Block until every registered thread has exited or `deadline` passes.
    ///
    /// Returns `true` if all threads exited in time.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut live = self.live.lock();
        while *live > 0 {
            if self.exited.wait_until(&mut live, deadline).timed_out() {
                return *live == 0;
            }
        }
        true
    }

    fn leave(&self) {
        let mut live = self.live.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.exited.notify_all();
        }
    }
}

/// Unregisters a thread from its [`ThreadLatch`] when dropped.
#[derive(Debug)]
pub(crate) struct LatchGuard {
    latch: Arc<ThreadLatch>,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.latch.leave();
    }
}
