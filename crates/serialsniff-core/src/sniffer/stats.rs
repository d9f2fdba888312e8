use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Packet counters shared by the capture and dispatch jobs. Counts
/// accumulate across sessions.
#[derive(Debug, Default)]
pub struct SnifferStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Packets delivered by the capture feed.
    pub captured: u64,
    /// Packets lost to a full dispatch queue.
    pub dropped: u64,
    /// Packets fanned out to the enabled sinks.
    pub dispatched: u64,
}

impl SnifferStats {
    pub(crate) fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }
}
