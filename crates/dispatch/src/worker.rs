//! Worker loop (§4.1). Each worker repeatedly drains the priority queues in
//! strict high/normal/low order and, once drained, parks on the shared
//! latch until either more work arrives, the idle timeout elapses, or
//! shutdown is signalled.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::DispatcherMetrics;
use crate::processor::RequestProcessor;
use crate::queue::{PendingRequest, PriorityQueues};

/// Runs until `shutdown` fires, or — once above `min_workers` — until it
/// sits idle for `idle_timeout`. Returning ends the worker; the autoscaler
/// (or the dispatcher's initial spawn) is responsible for replacing it if
/// demand picks back up.
pub async fn run_worker(
    id: usize,
    queues: Arc<PriorityQueues>,
    processor: Arc<dyn RequestProcessor>,
    metrics: Arc<DispatcherMetrics>,
    shutdown: CancellationToken,
    idle_timeout: Duration,
    min_workers: usize,
) {
    debug!(worker_id = id, "dispatch worker started");
    metrics.current_workers.fetch_add(1, Ordering::Relaxed);

    loop {
        let Some(req) = queues.pop() else {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = queues.notified() => continue,
                _ = tokio::time::sleep(idle_timeout) => {
                    if metrics.current_workers.load(Ordering::Relaxed) > min_workers {
                        debug!(worker_id = id, "dispatch worker exiting after idle timeout");
                        break;
                    }
                    continue;
                }
            }
        };

        process_one(req, processor.as_ref(), metrics.as_ref()).await;
    }

    metrics.current_workers.fetch_sub(1, Ordering::Relaxed);
    debug!(worker_id = id, "dispatch worker stopped");
}

async fn process_one(req: PendingRequest, processor: &dyn RequestProcessor, metrics: &DispatcherMetrics) {
    let PendingRequest {
        envelope,
        reply,
        cancel,
        enqueued_instant,
        tenant_permit,
    } = req;

    metrics.record_queue_wait(enqueued_instant.elapsed().as_millis() as u64);

    if cancel.is_cancelled() {
        let _ = reply.send(Err(core_domain::error::Error::ContextCancelled));
        drop(tenant_permit);
        return;
    }

    let request_id = envelope.request_id;
    let started = Instant::now();
    let result = processor.process(envelope, cancel).await;
    metrics.record_processing(started.elapsed().as_millis() as u64);
    metrics.requests_processed.fetch_add(1, Ordering::Relaxed);

    if reply.send(result).is_err() {
        warn!(%request_id, "dispatch reply receiver dropped before result was delivered");
    }
    drop(tenant_permit);
}
