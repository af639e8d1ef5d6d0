//! Dispatcher metrics: atomic counters and gauges, safe under concurrent
//! observers with no lock (§3 "Dispatcher Metrics").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use core_domain::dispatch::{
    DispatcherMetricsSnapshot, QueueStats, RequestCounters, TimingStats, WorkerStats,
};

use crate::queue::QueueDepths;

/// Live counters backing a dispatcher. Cheap to clone (wrapped in `Arc` by
/// the caller); every field is an atomic so readers never block writers.
#[derive(Default)]
pub struct DispatcherMetrics {
    pub requests_received: AtomicU64,
    pub requests_queued: AtomicU64,
    pub requests_processed: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub requests_timed_out: AtomicU64,
    pub workers_scaled_up: AtomicU64,
    pub workers_scaled_down: AtomicU64,

    pub current_workers: AtomicUsize,

    queue_wait_total_ms: AtomicU64,
    queue_wait_max_ms: AtomicU64,
    queue_wait_samples: AtomicU64,
    processing_total_ms: AtomicU64,
    processing_max_ms: AtomicU64,
    processing_samples: AtomicU64,
    last_processing_ms: AtomicU64,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queue_wait(&self, ms: u64) {
        self.queue_wait_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.queue_wait_samples.fetch_add(1, Ordering::Relaxed);
        self.queue_wait_max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn record_processing(&self, ms: u64) {
        self.processing_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.processing_samples.fetch_add(1, Ordering::Relaxed);
        self.processing_max_ms.fetch_max(ms, Ordering::Relaxed);
        self.last_processing_ms.store(ms, Ordering::Relaxed);
    }

    fn avg(total: u64, samples: u64) -> f64 {
        if samples == 0 {
            0.0
        } else {
            total as f64 / samples as f64
        }
    }

    /// Render a point-in-time snapshot for `GET /dispatcher/stats`. `depths`
    /// is read live from `PriorityQueues::depths()` — the gauge for each
    /// priority always equals the number of envelopes presently in that
    /// queue, never a cached counter.
    pub fn snapshot(
        &self,
        min_workers: usize,
        max_workers: usize,
        queue_capacity: usize,
        depths: QueueDepths,
    ) -> DispatcherMetricsSnapshot {
        let QueueDepths { high, normal, low } = depths;

        DispatcherMetricsSnapshot {
            workers: WorkerStats {
                current: self.current_workers.load(Ordering::Relaxed),
                min: min_workers,
                max: max_workers,
                scaled_up_total: self.workers_scaled_up.load(Ordering::Relaxed),
                scaled_down_total: self.workers_scaled_down.load(Ordering::Relaxed),
            },
            queues: QueueStats {
                high_depth: high,
                normal_depth: normal,
                low_depth: low,
                capacity: queue_capacity,
                utilization_pct: QueueStats::compute_utilization(queue_capacity, high, normal, low),
            },
            requests: RequestCounters {
                received: self.requests_received.load(Ordering::Relaxed),
                queued: self.requests_queued.load(Ordering::Relaxed),
                processed: self.requests_processed.load(Ordering::Relaxed),
                rejected: self.requests_rejected.load(Ordering::Relaxed),
                timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            },
            timing_ms: TimingStats {
                queue_wait_avg_ms: Self::avg(
                    self.queue_wait_total_ms.load(Ordering::Relaxed),
                    self.queue_wait_samples.load(Ordering::Relaxed),
                ),
                queue_wait_max_ms: self.queue_wait_max_ms.load(Ordering::Relaxed),
                processing_avg_ms: Self::avg(
                    self.processing_total_ms.load(Ordering::Relaxed),
                    self.processing_samples.load(Ordering::Relaxed),
                ),
                processing_max_ms: self.processing_max_ms.load(Ordering::Relaxed),
                last_ms: self.last_processing_ms.load(Ordering::Relaxed),
            },
            tenant: None,
        }
    }
}
