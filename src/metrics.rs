use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-stage counters, shared between a stage's worker and its observers.
///
/// Counters are updated with relaxed atomics on the worker's hot path; a
/// [`snapshot`](StageMetrics::snapshot) gives a coherent-enough view for
/// monitoring and tests.
#[derive(Debug, Clone, Default)]
pub struct StageMetrics {
    /// Items the stage produced or consumed successfully.
    processed: Arc<AtomicU64>,
    /// Items a filter stage dropped.
    filtered: Arc<AtomicU64>,
    /// User-callable errors swallowed by the stage.
    faults: Arc<AtomicU64>,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Total items processed so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Total items dropped by filtering.
    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    /// Total callable errors swallowed.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// A point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed(),
            filtered: self.filtered(),
            faults: self.faults(),
        }
    }
}

/// Plain-data copy of a stage's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub filtered: u64,
    pub faults: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = StageMetrics::new();
        for _ in 0..100 {
            metrics.record_processed();
        }
        metrics.record_filtered();
        metrics.record_fault();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.processed, 100);
        assert_eq!(snapshot.filtered, 1);
        assert_eq!(snapshot.faults, 1);
    }

    #[test]
    fn clones_share_state() {
        let metrics = StageMetrics::new();
        let clone = metrics.clone();
        clone.record_processed();
        assert_eq!(metrics.processed(), 1);
    }
}
