//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters updated by the reader and worker threads.
#[derive(Debug, Default)]
pub(crate) struct ServerStats {
    pub datagrams_received: AtomicU64,
    pub read_errors: AtomicU64,
    pub requests_failed: AtomicU64,
    pub responses_queued: AtomicU64,
    pub responses_written: AtomicU64,
    pub write_failures: AtomicU64,
    pub write_timeouts: AtomicU64,
    pub abandoned: AtomicU64,
}

impl ServerStats {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            datagrams_received: load(&self.datagrams_received),
            read_errors: load(&self.read_errors),
            requests_failed: load(&self.requests_failed),
            responses_queued: load(&self.responses_queued),
            responses_written: load(&self.responses_written),
            write_failures: load(&self.write_failures),
            write_timeouts: load(&self.write_timeouts),
            abandoned: load(&self.abandoned),
        }
    }
}

/// A point-in-time copy of the server counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Datagrams taken off the socket.
    pub datagrams_received: u64,
    /// Failed socket reads.
    pub read_errors: u64,
    /// Datagrams whose handler returned an error or panicked.
    pub requests_failed: u64,
    /// Responses handed to the response pool.
    pub responses_queued: u64,
    /// Responses the response handler wrote successfully.
    pub responses_written: u64,
    /// Response writes that failed, timeouts excluded.
    pub write_failures: u64,
    /// Response writes that timed out.
    pub write_timeouts: u64,
    /// Datagrams and responses dropped because shutdown outran them.
    pub abandoned: u64,
}
