use serde::{Deserialize, Serialize};

use crate::config::DispatcherConfig;
use crate::stream::{BoxStream, Usage};
use crate::tool::ToolCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Finish reason
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

impl FinishReason {
    /// `success` per §9's open question: true for {stop, tool_calls, length}.
    /// Only `error` counts as a health/usage failure.
    pub fn is_success(&self) -> bool {
        !matches!(self, FinishReason::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch stream events (downstream of the dispatcher / gateway service)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One event in a streaming chat response, after translation from the raw
/// provider event stream (`crate::stream::StreamEvent`) by the gateway
/// service. Sequence invariant: at most one `FinishEvent`, always last;
/// `UsageEvent` (if present) precedes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DispatchStreamEvent {
    #[serde(rename = "text_chunk")]
    TextChunk { delta: String },
    #[serde(rename = "tool_call")]
    ToolCallEvent(ToolCall),
    #[serde(rename = "usage")]
    UsageEvent { usage: Usage, cost_usd: f64 },
    #[serde(rename = "finish")]
    FinishEvent { reason: FinishReason },
    #[serde(rename = "policy_violation")]
    PolicyViolationEvent { message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A completed, non-streaming chat response plus the accounting the
/// gateway service attaches in §4.5 step 8.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResult {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub provider_id: String,
    pub model: String,
    pub cached: bool,
    /// Tool names policy stripped from this request before it reached the
    /// provider (§4.3's name-fallback resolution). Surfaced to HTTP callers
    /// via `X-ModelGate-Removed-Tools` on the non-streaming path.
    #[serde(default)]
    pub stripped_tools: Vec<String>,
}

/// Tagged union of what `Dispatcher::submit` may publish on success: a
/// complete response, or a lazy sequence of stream events. Errors are
/// carried by `crate::error::Error` rather than a third variant here, so
/// callers get ordinary `Result` ergonomics (`?`, combinators) instead of
/// matching a three-way enum at every call site.
pub enum DispatchOutcome {
    Complete(ChatCompletionResult),
    Stream(BoxStream<'static, DispatchStreamEvent>),
}

pub type DispatchResult = crate::error::Result<DispatchOutcome>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher metrics (stats snapshot)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A point-in-time snapshot of dispatcher metrics, serialized for
/// `GET /dispatcher/stats`. The live counters backing this snapshot are
/// atomics owned by the dispatch crate; this struct is the read-only view
/// handed to the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatcherMetricsSnapshot {
    pub workers: WorkerStats,
    pub queues: QueueStats,
    pub requests: RequestCounters,
    pub timing_ms: TimingStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkerStats {
    pub current: usize,
    pub min: usize,
    pub max: usize,
    pub scaled_up_total: u64,
    pub scaled_down_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStats {
    pub high_depth: usize,
    pub normal_depth: usize,
    pub low_depth: usize,
    pub capacity: usize,
    pub utilization_pct: f64,
}

impl QueueStats {
    pub fn compute_utilization(capacity: usize, high: usize, normal: usize, low: usize) -> f64 {
        if capacity == 0 {
            return 0.0;
        }
        ((high + normal + low) as f64 / capacity as f64) * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestCounters {
    pub received: u64,
    pub queued: u64,
    pub processed: u64,
    pub rejected: u64,
    pub timed_out: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimingStats {
    pub queue_wait_avg_ms: f64,
    pub queue_wait_max_ms: u64,
    pub processing_avg_ms: f64,
    pub processing_max_ms: u64,
    pub last_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TenantStats {
    pub tenant_id: String,
    pub current: u32,
    pub limit: u32,
}

/// Queue sizing per §4.1: given total capacity C and percentages (h%, n%),
/// high = floor(C*h/100), normal = floor(C*n/100), low = C - high - normal,
/// each floored at 1. Enforced once at dispatcher construction.
pub fn partition_queue_capacity(cfg: &DispatcherConfig) -> (usize, usize, usize) {
    let c = cfg.queue_capacity;
    let high = (c * cfg.high_priority_pct as usize / 100).max(1);
    let normal = (c * cfg.normal_priority_pct as usize / 100).max(1);
    let low = c.saturating_sub(high).saturating_sub(normal).max(1);
    (high, normal, low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_success_matrix() {
        assert!(FinishReason::Stop.is_success());
        assert!(FinishReason::ToolCalls.is_success());
        assert!(FinishReason::Length.is_success());
        assert!(!FinishReason::Error.is_success());
    }

    #[test]
    fn queue_partition_sums_do_not_exceed_capacity_plus_flooring() {
        let cfg = DispatcherConfig {
            queue_capacity: 100,
            high_priority_pct: 20,
            normal_priority_pct: 60,
            ..DispatcherConfig::default()
        };
        let (h, n, l) = partition_queue_capacity(&cfg);
        assert_eq!(h, 20);
        assert_eq!(n, 60);
        assert_eq!(l, 20);
    }

    #[test]
    fn queue_partition_floors_each_queue_at_one() {
        let cfg = DispatcherConfig {
            queue_capacity: 2,
            high_priority_pct: 1,
            normal_priority_pct: 1,
            ..DispatcherConfig::default()
        };
        let (h, n, l) = partition_queue_capacity(&cfg);
        assert!(h >= 1);
        assert!(n >= 1);
        assert!(l >= 1);
    }

    #[test]
    fn utilization_pct_computation() {
        assert_eq!(QueueStats::compute_utilization(100, 10, 20, 5), 35.0);
        assert_eq!(QueueStats::compute_utilization(0, 1, 1, 1), 0.0);
    }
}
