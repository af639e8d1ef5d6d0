//! Per-request cancellation, mirroring the session cancel-token pattern:
//! a cheap, cloneable `AtomicBool` flag rather than a channel, so checking
//! it on every suspension point costs nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation flag attached to one in-flight envelope. The admission
/// layer holds a clone and cancels it when the client disconnects; the
/// dispatcher and gateway service poll it at every suspension point named
/// in §5 (queue receive, tenant-semaphore retry, provider call, cache I/O,
/// SSE write).
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_across_clones() {
        let t = CancelToken::new();
        let t2 = t.clone();
        t.cancel();
        assert!(t2.is_cancelled());
    }
}
