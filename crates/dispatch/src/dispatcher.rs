//! The `Dispatcher`: admission, the priority queues, the tenant semaphore
//! table, the worker pool, and the autoscaler, wired into one handle per
//! §4.1. This is the "hard part" of the system — everything above it
//! (HTTP layer, policy enforcement, the gateway service) is a caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use core_domain::config::DispatcherConfig;
use core_domain::dispatch::{partition_queue_capacity, DispatchResult, DispatcherMetricsSnapshot};
use core_domain::envelope::RequestEnvelope;
use core_domain::error::Error;

use crate::autoscaler::run_autoscaler;
use crate::cancel::CancelToken;
use crate::metrics::DispatcherMetrics;
use crate::processor::RequestProcessor;
use crate::queue::{PendingRequest, PriorityQueues};
use crate::semaphore::TenantSemaphoreTable;
use crate::worker::run_worker;

/// A handle returned to the submitter: awaiting `reply` yields the
/// eventual `DispatchResult`; `cancel` lets the submitter (an HTTP
/// connection that just dropped, say) cancel the in-flight request.
pub struct Admitted {
    pub reply: oneshot::Receiver<DispatchResult>,
    pub cancel: CancelToken,
}

/// Request-admission and dispatch engine: accepts `RequestEnvelope`s,
/// enforces the tenant concurrency cap and queue backpressure, and runs
/// each admitted request on a pooled worker via the supplied
/// `RequestProcessor`.
pub struct Dispatcher {
    config: DispatcherConfig,
    queue_capacity: usize,
    queues: Arc<PriorityQueues>,
    tenants: Arc<TenantSemaphoreTable>,
    metrics: Arc<DispatcherMetrics>,
    processor: Arc<dyn RequestProcessor>,
    shutdown: CancellationToken,
    next_worker_id: AtomicUsize,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    started: std::sync::atomic::AtomicBool,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        processor: Arc<dyn RequestProcessor>,
        tenants: Arc<TenantSemaphoreTable>,
    ) -> Self {
        let (high, normal, low) = partition_queue_capacity(&config);
        let queue_capacity = high + normal + low;
        Self {
            config,
            queue_capacity,
            queues: Arc::new(PriorityQueues::new(high, normal, low)),
            tenants,
            metrics: Arc::new(DispatcherMetrics::new()),
            processor,
            shutdown: CancellationToken::new(),
            next_worker_id: AtomicUsize::new(0),
            tasks: parking_lot::Mutex::new(Vec::new()),
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(run_worker(
            id,
            self.queues.clone(),
            self.processor.clone(),
            self.metrics.clone(),
            self.shutdown.clone(),
            Duration::from_millis(self.config.idle_timeout_ms),
            self.config.min_workers,
        ));
        self.tasks.lock().push(handle);
    }

    /// Spawns the initial worker pool (`min_workers`) and the autoscaler.
    /// Idempotent: a second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            queue_capacity = self.queue_capacity,
            "starting dispatcher"
        );
        for _ in 0..self.config.min_workers {
            self.spawn_worker();
        }

        let config = self.config.clone();
        let queue_capacity = self.queue_capacity;
        let queues = self.queues.clone();
        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();
        let this = self.clone();
        let autoscaler_handle = tokio::spawn(async move {
            run_autoscaler(config, queue_capacity, queues, metrics, shutdown, move || {
                this.spawn_worker();
            })
            .await;
        });
        self.tasks.lock().push(autoscaler_handle);
    }

    /// Signals shutdown, drains every queued request with
    /// `Error::ShuttingDown`, and waits for all worker/autoscaler tasks to
    /// finish. Safe to call more than once; only the first call does work.
    pub async fn stop(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("stopping dispatcher");
        self.shutdown.cancel();
        self.queues.drain_with_shutdown_error();

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "dispatch task panicked during shutdown");
            }
        }
    }

    /// Admits `envelope`, returning a handle to await the result.
    ///
    /// Fails fast (never queues) on: dispatcher shutting down, tenant at
    /// its concurrency cap, or the matching priority queue already full.
    pub fn submit(self: &Arc<Self>, envelope: RequestEnvelope) -> Result<Admitted, Error> {
        self.metrics.requests_received.fetch_add(1, Ordering::Relaxed);

        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let tenant_permit = match self.tenants.try_acquire(&envelope.tenant_id) {
            Some(permit) => permit,
            None => {
                self.metrics.requests_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(Error::TenantLimited);
            }
        };

        let (tx, rx) = oneshot::channel();
        let cancel = CancelToken::new();
        let pending = PendingRequest::with_cancel(envelope, tx, tenant_permit, cancel.clone());

        match self.queues.push(pending) {
            Ok(()) => {
                self.metrics.requests_queued.fetch_add(1, Ordering::Relaxed);
                Ok(Admitted { reply: rx, cancel })
            }
            Err(_rejected) => {
                self.metrics.requests_rejected.fetch_add(1, Ordering::Relaxed);
                Err(Error::QueueFull)
            }
        }
    }

    /// Convenience wrapper around `submit` that also enforces the
    /// queue-wait timeout and resolves to a single `DispatchResult`.
    pub async fn submit_and_await(self: &Arc<Self>, envelope: RequestEnvelope) -> DispatchResult {
        let admitted = self.submit(envelope)?;
        let timeout = Duration::from_millis(self.config.queue_timeout_ms);
        match tokio::time::timeout(timeout, admitted.reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_recv_error)) => Err(Error::Internal(
                "dispatch worker dropped without sending a reply".to_string(),
            )),
            Err(_elapsed) => {
                admitted.cancel.cancel();
                self.metrics.requests_timed_out.fetch_add(1, Ordering::Relaxed);
                Err(Error::QueueTimeout)
            }
        }
    }

    pub fn stats(&self) -> DispatcherMetricsSnapshot {
        self.metrics.snapshot(
            self.config.min_workers,
            self.config.max_workers,
            self.queue_capacity,
            self.queues.depths(),
        )
    }

    pub fn tenant_stats(&self, tenant_id: &core_domain::auth::TenantId) -> core_domain::dispatch::TenantStats {
        self.tenants.stats(tenant_id)
    }

    pub fn capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semaphore::DefaultTierResolver;
    use async_trait::async_trait;
    use core_domain::auth::{ApiKeyId, TenantId};
    use core_domain::dispatch::{ChatCompletionResult, DispatchOutcome, FinishReason};
    use core_domain::envelope::{ChatPayload, Priority};

    struct EchoProcessor;

    #[async_trait]
    impl RequestProcessor for EchoProcessor {
        async fn process(&self, envelope: RequestEnvelope, _cancel: CancelToken) -> DispatchResult {
            Ok(DispatchOutcome::Complete(ChatCompletionResult {
                content: Some(format!("echo:{}", envelope.chat_payload.model)),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                usage: None,
                cost_usd: 0.0,
                latency_ms: 0,
                provider_id: "test".to_string(),
                model: envelope.chat_payload.model,
                cached: false,
                stripped_tools: vec![],
            }))
        }
    }

    struct HangingProcessor;

    #[async_trait]
    impl RequestProcessor for HangingProcessor {
        async fn process(&self, _envelope: RequestEnvelope, cancel: CancelToken) -> DispatchResult {
            loop {
                if cancel.is_cancelled() {
                    return Err(Error::ContextCancelled);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    fn envelope(priority: u8) -> RequestEnvelope {
        RequestEnvelope::new(
            ChatPayload {
                model: "gpt-4".to_string(),
                messages: vec![],
                tools: vec![],
                stream: false,
                max_tokens: None,
                temperature: None,
                tool_choice: None,
            },
            TenantId::new(uuid::Uuid::new_v4().to_string()),
            ApiKeyId::new(uuid::Uuid::new_v4().to_string()),
            Priority::new(priority),
        )
    }

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: 10,
            high_priority_pct: 20,
            normal_priority_pct: 60,
            min_workers: 2,
            max_workers: 4,
            idle_timeout_ms: 200,
            scale_interval_ms: 20,
            scale_up_threshold: 0.8,
            scale_up_step: 1,
            queue_timeout_ms: 500,
        }
    }

    #[tokio::test]
    async fn submits_and_completes_a_request() {
        let dispatcher = Arc::new(Dispatcher::new(
            test_config(),
            Arc::new(EchoProcessor),
            Arc::new(TenantSemaphoreTable::new(Arc::new(DefaultTierResolver::default()))),
        ));
        dispatcher.start();

        let result = dispatcher.submit_and_await(envelope(9)).await.unwrap();
        match result {
            DispatchOutcome::Complete(r) => assert_eq!(r.content.unwrap(), "echo:gpt-4"),
            _ => panic!("expected a complete outcome"),
        }

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn rejects_when_tenant_at_cap() {
        // No workers started: this only exercises submission-time admission,
        // and a started `HangingProcessor` worker would never finish for
        // `stop` to join on.
        let dispatcher = Arc::new(Dispatcher::new(
            test_config(),
            Arc::new(HangingProcessor),
            Arc::new(TenantSemaphoreTable::new(Arc::new(DefaultTierResolver::new(1)))),
        ));

        let env = envelope(9);
        let tenant_id = env.tenant_id.clone();
        let _first = dispatcher.submit(env).unwrap();

        let mut second = envelope(9);
        second.tenant_id = tenant_id;
        let err = dispatcher.submit(second).unwrap_err();
        assert!(matches!(err, Error::TenantLimited));
    }

    #[tokio::test]
    async fn queue_full_is_rejected_immediately() {
        let mut cfg = test_config();
        cfg.queue_capacity = 3;
        cfg.high_priority_pct = 34;
        cfg.normal_priority_pct = 34;
        // every one-off tenant gets its own semaphore slot, so capacity is
        // bounded purely by the high queue (1 slot after flooring).
        let dispatcher = Arc::new(Dispatcher::new(
            cfg,
            Arc::new(HangingProcessor),
            Arc::new(TenantSemaphoreTable::new(Arc::new(DefaultTierResolver::default()))),
        ));
        // Do not start workers, so nothing drains the queue.
        let _first = dispatcher.submit(envelope(9)).unwrap();
        let err = dispatcher.submit(envelope(9)).unwrap_err();
        assert!(matches!(err, Error::QueueFull));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_drains_pending_replies() {
        let dispatcher = Arc::new(Dispatcher::new(
            test_config(),
            Arc::new(HangingProcessor),
            Arc::new(TenantSemaphoreTable::new(Arc::new(DefaultTierResolver::default()))),
        ));
        // Queue a request without starting any workers, so it sits pending.
        let admitted = dispatcher.submit(envelope(9)).unwrap();

        dispatcher.stop().await;
        dispatcher.stop().await;

        let result = admitted.reply.await.unwrap();
        assert!(matches!(result, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn timeout_cancels_a_hung_request() {
        let mut cfg = test_config();
        cfg.queue_timeout_ms = 50;
        let dispatcher = Arc::new(Dispatcher::new(
            cfg,
            Arc::new(HangingProcessor),
            Arc::new(TenantSemaphoreTable::new(Arc::new(DefaultTierResolver::default()))),
        ));
        dispatcher.start();

        let err = dispatcher.submit_and_await(envelope(9)).await.unwrap_err();
        assert!(matches!(err, Error::QueueTimeout));

        dispatcher.stop().await;
    }
}
