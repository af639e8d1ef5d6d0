//! The three bounded priority FIFOs (§4.1) plus the work-available latch
//! that wakes idle workers.
//!
//! Re-architecture note carried from the design doc: do not give each
//! priority its own condvar — a worker waiting on three condvars can miss a
//! wakeup that lands between its last check and the next wait, and a
//! condvar per queue ruins the triple-nested priority preference (a worker
//! woken for the low queue has no way to notice a high-priority item that
//! arrived in the meantime without re-checking all three anyway). Instead
//! every push notifies one shared `Notify`; a woken worker always re-drains
//! high, then normal, then low before waiting again, so the preference order
//! is enforced by the pop order, not by which queue woke it.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit};

use core_domain::dispatch::DispatchResult;
use core_domain::envelope::{QueueClass, RequestEnvelope};

use crate::cancel::CancelToken;

/// One admitted request sitting in a priority queue, waiting for a worker.
///
/// Carries the tenant semaphore permit acquired at submission time: holding
/// it here (rather than releasing it once the request is merely enqueued)
/// keeps the tenant's concurrency slot occupied for the request's full
/// lifetime — queue wait plus processing — and frees it automatically when
/// the request is dropped, whichever way it finishes.
pub struct PendingRequest {
    pub envelope: RequestEnvelope,
    pub reply: oneshot::Sender<DispatchResult>,
    pub cancel: CancelToken,
    pub enqueued_instant: Instant,
    pub tenant_permit: OwnedSemaphorePermit,
}

impl PendingRequest {
    pub fn new(
        envelope: RequestEnvelope,
        reply: oneshot::Sender<DispatchResult>,
        tenant_permit: OwnedSemaphorePermit,
    ) -> Self {
        Self::with_cancel(envelope, reply, tenant_permit, CancelToken::new())
    }

    /// Like `new`, but accepts a `CancelToken` created by the caller so it
    /// can retain a clone to cancel the request later (on client
    /// disconnect, or a queue-wait timeout).
    pub fn with_cancel(
        envelope: RequestEnvelope,
        reply: oneshot::Sender<DispatchResult>,
        tenant_permit: OwnedSemaphorePermit,
        cancel: CancelToken,
    ) -> Self {
        Self {
            envelope,
            reply,
            cancel,
            enqueued_instant: Instant::now(),
            tenant_permit,
        }
    }

    pub fn queue_class(&self) -> QueueClass {
        self.envelope.priority.queue_class()
    }

    pub fn wait_ms(&self) -> u64 {
        self.enqueued_instant.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDepths {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

/// Bounded FIFOs for each `QueueClass`, sized at construction per
/// `partition_queue_capacity` and never resized afterward.
pub struct PriorityQueues {
    high: Mutex<VecDeque<PendingRequest>>,
    normal: Mutex<VecDeque<PendingRequest>>,
    low: Mutex<VecDeque<PendingRequest>>,
    high_cap: usize,
    normal_cap: usize,
    low_cap: usize,
    work_available: Notify,
}

impl PriorityQueues {
    pub fn new(high_cap: usize, normal_cap: usize, low_cap: usize) -> Self {
        Self {
            high: Mutex::new(VecDeque::with_capacity(high_cap)),
            normal: Mutex::new(VecDeque::with_capacity(normal_cap)),
            low: Mutex::new(VecDeque::with_capacity(low_cap)),
            high_cap,
            normal_cap,
            low_cap,
            work_available: Notify::new(),
        }
    }

    /// Enqueues `req` onto the FIFO matching its priority. Returns the
    /// request back to the caller, unconsumed, if that queue is already at
    /// capacity — the caller turns this into `Error::QueueFull`.
    pub fn push(&self, req: PendingRequest) -> Result<(), PendingRequest> {
        let (deque, cap) = match req.queue_class() {
            QueueClass::High => (&self.high, self.high_cap),
            QueueClass::Normal => (&self.normal, self.normal_cap),
            QueueClass::Low => (&self.low, self.low_cap),
        };
        {
            let mut guard = deque.lock();
            if guard.len() >= cap {
                return Err(req);
            }
            guard.push_back(req);
        }
        self.work_available.notify_one();
        Ok(())
    }

    /// Non-blocking pop in strict priority order: high, then normal, then
    /// low. Never awaits; callers combine this with `notified()` to sleep
    /// between polls instead of busy-looping.
    pub fn pop(&self) -> Option<PendingRequest> {
        if let Some(req) = self.high.lock().pop_front() {
            return Some(req);
        }
        if let Some(req) = self.normal.lock().pop_front() {
            return Some(req);
        }
        self.low.lock().pop_front()
    }

    /// Resolves once a push has happened since the last call (or
    /// immediately, if a push happened while nobody was waiting — `Notify`
    /// coalesces a single outstanding permit rather than queueing one per
    /// push).
    pub async fn notified(&self) {
        self.work_available.notified().await;
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            high: self.high.lock().len(),
            normal: self.normal.lock().len(),
            low: self.low.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        let d = self.depths();
        d.high == 0 && d.normal == 0 && d.low == 0
    }

    /// Drains every pending request, resolving each reply with
    /// `Error::ShuttingDown`. Used by graceful shutdown so no caller is left
    /// waiting on a reply that will never arrive.
    pub fn drain_with_shutdown_error(&self) {
        for deque in [&self.high, &self.normal, &self.low] {
            let mut guard = deque.lock();
            while let Some(req) = guard.pop_front() {
                let _ = req.reply.send(Err(core_domain::error::Error::ShuttingDown));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_domain::auth::{ApiKeyId, TenantId};
    use core_domain::envelope::{ChatPayload, Priority};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

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

    fn unlimited_permit() -> OwnedSemaphorePermit {
        Arc::new(Semaphore::new(1)).try_acquire_owned().unwrap()
    }

    fn pending(priority: u8) -> PendingRequest {
        let (tx, _rx) = oneshot::channel();
        PendingRequest::new(envelope(priority), tx, unlimited_permit())
    }

    #[test]
    fn pops_high_before_normal_before_low() {
        let q = PriorityQueues::new(10, 10, 10);
        q.push(pending(2)).unwrap();
        q.push(pending(5)).unwrap();
        q.push(pending(9)).unwrap();

        assert_eq!(q.pop().unwrap().queue_class(), QueueClass::High);
        assert_eq!(q.pop().unwrap().queue_class(), QueueClass::Normal);
        assert_eq!(q.pop().unwrap().queue_class(), QueueClass::Low);
        assert!(q.pop().is_none());
    }

    #[test]
    fn push_respects_per_class_capacity() {
        let q = PriorityQueues::new(1, 1, 1);
        assert!(q.push(pending(9)).is_ok());
        assert!(q.push(pending(9)).is_err(), "high queue at capacity");
        assert!(q.push(pending(5)).is_ok());
        assert!(q.push(pending(5)).is_err(), "normal queue at capacity");
    }

    #[test]
    fn fifo_within_a_class() {
        let q = PriorityQueues::new(10, 10, 10);
        let first = pending(9);
        let first_id = first.envelope.request_id;
        q.push(first).unwrap();
        q.push(pending(9)).unwrap();

        assert_eq!(q.pop().unwrap().envelope.request_id, first_id);
    }

    #[tokio::test]
    async fn notified_resolves_after_a_push_with_no_prior_waiter() {
        let q = PriorityQueues::new(10, 10, 10);
        q.push(pending(9)).unwrap();
        tokio::time::timeout(std::time::Duration::from_millis(50), q.notified())
            .await
            .expect("notify permit should already be set");
    }

    #[test]
    fn drain_with_shutdown_error_resolves_every_waiting_reply() {
        let q = PriorityQueues::new(10, 10, 10);
        let (tx, rx) = oneshot::channel();
        q.push(PendingRequest::new(envelope(9), tx, unlimited_permit()))
            .unwrap();
        q.drain_with_shutdown_error();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(core_domain::error::Error::ShuttingDown)
        ));
        assert!(q.is_empty());
    }
}
