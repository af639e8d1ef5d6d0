use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls the admission queue, worker pool, and autoscaler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Total capacity shared across the three priority queues.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
    /// Percentage of `queue_capacity` reserved for the high-priority queue.
    #[serde(default = "d_high_pct")]
    pub high_priority_pct: u8,
    /// Percentage of `queue_capacity` reserved for the normal-priority queue.
    /// The remainder goes to the low-priority queue.
    #[serde(default = "d_normal_pct")]
    pub normal_priority_pct: u8,
    #[serde(default = "d_min_workers")]
    pub min_workers: usize,
    #[serde(default = "d_max_workers")]
    pub max_workers: usize,
    /// Milliseconds an idle worker waits before exiting, once above `min_workers`.
    #[serde(default = "d_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// How often the autoscaler samples utilization, in milliseconds.
    #[serde(default = "d_scale_interval_ms")]
    pub scale_interval_ms: u64,
    /// Utilization fraction (0.0-1.0) above which the autoscaler adds workers.
    #[serde(default = "d_scale_up_threshold")]
    pub scale_up_threshold: f64,
    /// Number of workers added per scale-up decision.
    #[serde(default = "d_scale_up_step")]
    pub scale_up_step: usize,
    /// Milliseconds a request may wait in queue before being rejected with
    /// a queue-timeout error.
    #[serde(default = "d_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: d_queue_capacity(),
            high_priority_pct: d_high_pct(),
            normal_priority_pct: d_normal_pct(),
            min_workers: d_min_workers(),
            max_workers: d_max_workers(),
            idle_timeout_ms: d_idle_timeout_ms(),
            scale_interval_ms: d_scale_interval_ms(),
            scale_up_threshold: d_scale_up_threshold(),
            scale_up_step: d_scale_up_step(),
            queue_timeout_ms: d_queue_timeout_ms(),
        }
    }
}

fn d_queue_capacity() -> usize {
    1_000
}
fn d_high_pct() -> u8 {
    20
}
fn d_normal_pct() -> u8 {
    60
}
fn d_min_workers() -> usize {
    4
}
fn d_max_workers() -> usize {
    64
}
fn d_idle_timeout_ms() -> u64 {
    30_000
}
fn d_scale_interval_ms() -> u64 {
    5_000
}
fn d_scale_up_threshold() -> f64 {
    0.8
}
fn d_scale_up_step() -> usize {
    2
}
fn d_queue_timeout_ms() -> u64 {
    10_000
}
