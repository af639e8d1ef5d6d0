use serde::Serialize;

/// Structured events emitted at key points along the admission and gateway
/// path, logged via `tracing::info!` as a single JSON field so they can be
/// grepped or shipped without a dedicated telemetry sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CacheHit {
        role_id: String,
        model: String,
    },
    CacheMiss {
        role_id: String,
        model: String,
    },
    ModelSwitch {
        from_model: String,
        to_model: String,
        reason: String,
    },
    ToolDiscovered {
        tool_name: String,
        schema_hash: String,
    },
    ToolPermissionDecision {
        tool_name: String,
        role_id: String,
        status: String,
    },
    PolicyViolation {
        kind: String,
        message: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        /// The configured model-profile key this request was routed under
        /// (e.g. "default", "fast"), independent of the caller's RBAC role.
        profile: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    HealthEvent {
        provider: String,
        model: String,
        success: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "gateway_trace_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_event_serializes_with_tag() {
        let ev = TraceEvent::CacheHit {
            role_id: "r1".into(),
            model: "gpt-4o".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"event\":\"CacheHit\""));
    }
}
