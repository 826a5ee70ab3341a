//! Runtime-wide counters.
//!
//! All counters are relaxed atomics; snapshots are approximate while the
//! runtime is busy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide runtime metrics
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub actors_created: AtomicU64,
    pub actors_destroyed: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_processed: AtomicU64,
    pub total_processing_time_ns: AtomicU64,
    pub batches_run: AtomicU64,
    pub yields: AtomicU64,
    pub affinity_requeues: AtomicU64,
    pub worker_faults: AtomicU64,
}

pub(crate) static METRICS: RuntimeMetrics = RuntimeMetrics {
    actors_created: AtomicU64::new(0),
    actors_destroyed: AtomicU64::new(0),
    messages_sent: AtomicU64::new(0),
    messages_processed: AtomicU64::new(0),
    total_processing_time_ns: AtomicU64::new(0),
    batches_run: AtomicU64::new(0),
    yields: AtomicU64::new(0),
    affinity_requeues: AtomicU64::new(0),
    worker_faults: AtomicU64::new(0),
};

impl RuntimeMetrics {
    pub fn record_batch(&self, processed: u64, duration: Duration) {
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(processed, Ordering::Relaxed);
        self.total_processing_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn avg_processing_time_ns(&self) -> f64 {
        let count = self.messages_processed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_processing_time_ns.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let created = self.actors_created.load(Ordering::Relaxed);
        let destroyed = self.actors_destroyed.load(Ordering::Relaxed);
        MetricsSnapshot {
            actors_created: created,
            actors_destroyed: destroyed,
            actors_alive: created.saturating_sub(destroyed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            avg_processing_time_ns: self.avg_processing_time_ns(),
            batches_run: self.batches_run.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            affinity_requeues: self.affinity_requeues.load(Ordering::Relaxed),
            worker_faults: self.worker_faults.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RuntimeMetrics`]
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub actors_created: u64,
    pub actors_destroyed: u64,
    pub actors_alive: u64,
    pub messages_sent: u64,
    pub messages_processed: u64,
    pub avg_processing_time_ns: f64,
    pub batches_run: u64,
    pub yields: u64,
    pub affinity_requeues: u64,
    pub worker_faults: u64,
}

/// Snapshot of the process-wide counters.
pub fn metrics() -> MetricsSnapshot {
    METRICS.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_processing_time() {
        let metrics = RuntimeMetrics::default();
        assert_eq!(metrics.avg_processing_time_ns(), 0.0);

        metrics.record_batch(4, Duration::from_nanos(400));
        assert_eq!(metrics.avg_processing_time_ns(), 100.0);
        assert_eq!(metrics.snapshot().batches_run, 1);
    }

    #[test]
    fn test_alive_count_saturates() {
        let metrics = RuntimeMetrics::default();
        metrics.actors_destroyed.fetch_add(1, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().actors_alive, 0);
    }
}
