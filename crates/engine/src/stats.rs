use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for operational visibility. Shared by the tick loop and the
/// writer worker; readers take a `snapshot()`.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub ticks: AtomicU64,
    pub updates: AtomicU64,
    pub values_emitted: AtomicU64,
    pub update_errors: AtomicU64,
    pub feed_errors: AtomicU64,
    pub last_tick_micros: AtomicU64,

    pub rows_written: AtomicU64,
    pub flushes: AtomicU64,
    pub flush_failures: AtomicU64,
    pub rows_dropped: AtomicU64,
}

/// Point-in-time copy of `SchedulerStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub updates: u64,
    pub values_emitted: u64,
    pub update_errors: u64,
    pub feed_errors: u64,
    pub last_tick_micros: u64,
    pub rows_written: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub rows_dropped: u64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            values_emitted: self.values_emitted.load(Ordering::Relaxed),
            update_errors: self.update_errors.load(Ordering::Relaxed),
            feed_errors: self.feed_errors.load(Ordering::Relaxed),
            last_tick_micros: self.last_tick_micros.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
        }
    }
}
