use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for monitoring a channel.
///
/// Producer-side and consumer-side counters sit on separate cache lines so
/// enabling metrics does not make producers and the consumer share a line.
#[derive(Debug, Default)]
pub struct Metrics {
    calls_produced: CachePadded<AtomicU64>,
    idle_rounds: CachePadded<AtomicU64>,
    calls_abandoned: CachePadded<AtomicU64>,
    calls_consumed: CachePadded<AtomicU64>,
    dispatch_failures: CachePadded<AtomicU64>,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub calls_produced: u64,
    pub idle_rounds: u64,
    pub calls_abandoned: u64,
    pub calls_consumed: u64,
    pub dispatch_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_call_produced(&self) {
        self.calls_produced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_idle_rounds(&self, n: u64) {
        self.idle_rounds.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_call_abandoned(&self) {
        self.calls_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_calls_consumed(&self, n: u64) {
        self.calls_consumed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_produced: self.calls_produced.load(Ordering::Relaxed),
            idle_rounds: self.idle_rounds.load(Ordering::Relaxed),
            calls_abandoned: self.calls_abandoned.load(Ordering::Relaxed),
            calls_consumed: self.calls_consumed.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
        }
    }
}
