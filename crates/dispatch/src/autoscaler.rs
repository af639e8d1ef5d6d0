//! Scale-up-only autoscaler (§4.1). Samples queue utilization on a fixed
//! interval and adds workers when the shared queues run hot; there is no
//! active scale-down decision here — a worker retires itself once it sits
//! idle past `idle_timeout_ms` and the pool is above `min_workers`, so the
//! pool shrinks passively rather than on a second timer racing the first.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use core_domain::config::DispatcherConfig;
use core_domain::dispatch::QueueStats;

use crate::metrics::DispatcherMetrics;
use crate::queue::PriorityQueues;

/// Runs until `shutdown` fires. `spawn_worker` is called once per worker
/// the autoscaler decides to add; the dispatcher supplies it so this module
/// doesn't need to know how a worker task is constructed.
pub async fn run_autoscaler<F>(
    config: DispatcherConfig,
    queue_capacity: usize,
    queues: Arc<PriorityQueues>,
    metrics: Arc<DispatcherMetrics>,
    shutdown: CancellationToken,
    mut spawn_worker: F,
) where
    F: FnMut() + Send,
{
    let mut interval = tokio::time::interval(Duration::from_millis(config.scale_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let depths = queues.depths();
                let utilization = QueueStats::compute_utilization(
                    queue_capacity,
                    depths.high,
                    depths.normal,
                    depths.low,
                ) / 100.0;

                if utilization <= config.scale_up_threshold {
                    continue;
                }

                let current = metrics.current_workers.load(Ordering::Relaxed);
                if current >= config.max_workers {
                    continue;
                }

                let to_add = config.scale_up_step.min(config.max_workers - current);
                if to_add == 0 {
                    continue;
                }

                info!(
                    current_workers = current,
                    utilization,
                    to_add,
                    "scaling up dispatch worker pool"
                );
                for _ in 0..to_add {
                    spawn_worker();
                }
                metrics
                    .workers_scaled_up
                    .fetch_add(to_add as u64, Ordering::Relaxed);
            }
        }
    }
}
