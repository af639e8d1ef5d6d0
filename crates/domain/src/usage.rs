use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::ApiKeyId;

/// A single accounting row written once per terminated request — either a
/// successful completion, an upstream failure, or a policy violation
/// (recorded with zero tokens and the violation code so it still shows up
/// in admin-facing usage logs, per §7's propagation rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub api_key_id: ApiKeyId,
    pub request_id: Uuid,
    pub model: String,
    pub provider: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub tool_call_count: u32,
    /// Loosely-typed extensible metadata, e.g. last user text for admin
    /// review. Kept as JSON rather than a fixed struct since this column
    /// is explicitly meant to grow ad hoc.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a zero-token usage record for a request that never reached a
    /// provider call because it was rejected by the policy enforcer.
    pub fn for_violation(
        api_key_id: ApiKeyId,
        request_id: Uuid,
        model: String,
        violation_code: &str,
        violation_message: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key_id,
            request_id,
            model,
            provider: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            success: false,
            error_code: Some(violation_code.to_string()),
            error_message: Some(violation_message.to_string()),
            tool_call_count: 0,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_record_has_zero_tokens_and_error_code() {
        let rec = UsageRecord::for_violation(
            ApiKeyId::new("k1"),
            Uuid::new_v4(),
            "gpt-4o".into(),
            "model_not_allowed",
            "model not in allowed list",
        );
        assert_eq!(rec.total_tokens, 0);
        assert!(!rec.success);
        assert_eq!(rec.error_code.as_deref(), Some("model_not_allowed"));
    }
}
