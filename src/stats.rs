//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of an engine's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests accepted by `enqueue`/`submit`.
    pub submitted: u64,
    pub windows_closed: u64,
    /// Backend `fetch_many` invocations, one per chunk.
    pub backend_calls: u64,
    pub backend_failures: u64,
    /// Requests that shared a backend key with an earlier request in the same window.
    pub deduplicated: u64,
    /// Requests dropped or rejected at teardown.
    pub abandoned: u64,
}

impl StatsSnapshot {
    /// Average number of caller requests served per backend call.
    pub fn coalescing_ratio(&self) -> f64 {
        if self.backend_calls == 0 {
            0.0
        } else {
            self.submitted.saturating_sub(self.abandoned) as f64 / self.backend_calls as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    pub(crate) submitted: AtomicU64,
    pub(crate) windows_closed: AtomicU64,
    pub(crate) backend_calls: AtomicU64,
    pub(crate) backend_failures: AtomicU64,
    pub(crate) deduplicated: AtomicU64,
    pub(crate) abandoned: AtomicU64,
}

impl EngineStats {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn to_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            windows_closed: self.windows_closed.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}
