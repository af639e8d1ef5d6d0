use serde::{Deserialize, Serialize};

use crate::auth::RoleId;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Violation taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A typed policy violation raised by the policy enforcer.
///
/// Each variant carries the human-readable reason. `code()`/`status_code()`
/// implement the wire mapping from §4.3 of the gateway's admission contract.
#[derive(thiserror::Error, Debug, Clone, Serialize, Deserialize)]
pub enum Violation {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    System(String),
    #[error("{0}")]
    Model(String),
    #[error("{0}")]
    Prompt(String),
    #[error("{0}")]
    Tool(String),
    #[error("{0}")]
    RateLimit(String),
}

impl Violation {
    pub fn message(&self) -> &str {
        match self {
            Violation::Auth(m)
            | Violation::System(m)
            | Violation::Model(m)
            | Violation::Prompt(m)
            | Violation::Tool(m)
            | Violation::RateLimit(m) => m,
        }
    }

    /// Stable wire code used in the `{"error":{"type": ...}}` envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Violation::Auth(_) => "unauthorized",
            Violation::System(_) => "server_error",
            Violation::Model(_) => "model_not_allowed",
            Violation::Prompt(_) => "policy_violation",
            Violation::Tool(_) => "tool_not_allowed",
            Violation::RateLimit(_) => "rate_limit_exceeded",
        }
    }

    /// HTTP status code per the §4.3 mapping table: auth→401, rate_limit→429,
    /// model→403, prompt/tool→400, system→503, other→403.
    pub fn status_code(&self) -> u16 {
        match self {
            Violation::Auth(_) => 401,
            Violation::RateLimit(_) => 429,
            Violation::Model(_) => 403,
            Violation::Prompt(_) | Violation::Tool(_) => 400,
            Violation::System(_) => 503,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Role policy and sub-policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bundle of sub-policies attached to a role. Every field is independently
/// toggleable; a request is gated by the union of its direct-role policy
/// and every policy inherited from the roles of its group.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolePolicy {
    pub role_id: RoleId,
    #[serde(default)]
    pub prompt_security: Option<PromptSecurityPolicy>,
    #[serde(default)]
    pub tool_calling: Option<ToolCallingPolicy>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitPolicy>,
    #[serde(default)]
    pub model_restriction: Option<ModelRestrictionPolicy>,
    #[serde(default)]
    pub caching: Option<CachingPolicy>,
    #[serde(default)]
    pub routing: Option<RoutingPolicy>,
    #[serde(default)]
    pub resilience: Option<ResiliencePolicy>,
    #[serde(default)]
    pub budget: Option<BudgetPolicy>,
}

/// Blocked prompt patterns and a maximum prompt length, checked before a
/// request's messages are ever sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSecurityPolicy {
    #[serde(default)]
    pub denied_patterns: Vec<String>,
    #[serde(default)]
    pub max_prompt_chars: Option<usize>,
}

/// Whether the role may use tool calling at all, and whether tool
/// permission decisions default to requiring approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallingPolicy {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// When true, a PENDING tool permission is treated as DENIED rather
    /// than ALLOWED.
    #[serde(default)]
    pub require_approval: bool,
}

fn d_true() -> bool {
    true
}

/// Requests-per-minute and tokens-per-day limits. Structurally mirrors a
/// simple daily-usage quota table, generalized to key off (tenant, role)
/// rather than a single agent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub tokens_per_day: Option<u64>,
}

/// Allowed model list. Empty means all models are allowed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRestrictionPolicy {
    #[serde(default)]
    pub allowed_models: Vec<String>,
}

impl ModelRestrictionPolicy {
    pub fn allows(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingPolicy {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResiliencePolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPolicy {
    #[serde(default)]
    pub daily_cost_usd: Option<f64>,
}

/// Combine the allowed-model sets of every gathered policy per the union
/// rule in §4.3: a model is allowed iff it appears in the union of
/// allowed-models across all applicable restrictions; if no policy
/// declares any allowed models, all are allowed.
pub fn model_allowed(policies: &[RolePolicy], model: &str) -> bool {
    let restrictions: Vec<&ModelRestrictionPolicy> = policies
        .iter()
        .filter_map(|p| p.model_restriction.as_ref())
        .collect();
    if restrictions.is_empty() {
        return true;
    }
    if restrictions.iter().all(|r| r.allowed_models.is_empty()) {
        return true;
    }
    restrictions.iter().any(|r| r.allows(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with_models(models: &[&str]) -> RolePolicy {
        RolePolicy {
            role_id: RoleId::new("r1"),
            model_restriction: Some(ModelRestrictionPolicy {
                allowed_models: models.iter().map(|s| s.to_string()).collect(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn empty_allowed_models_allows_everything() {
        let p = ModelRestrictionPolicy::default();
        assert!(p.allows("gpt-4o"));
    }

    #[test]
    fn union_across_policies() {
        let policies = vec![policy_with_models(&["gpt-4o-mini"]), policy_with_models(&["gpt-4o"])];
        assert!(model_allowed(&policies, "gpt-4o"));
        assert!(model_allowed(&policies, "gpt-4o-mini"));
        assert!(!model_allowed(&policies, "claude-3"));
    }

    #[test]
    fn no_restriction_policies_allows_everything() {
        let policies = vec![RolePolicy {
            role_id: RoleId::new("r1"),
            ..Default::default()
        }];
        assert!(model_allowed(&policies, "anything"));
    }

    #[test]
    fn violation_status_codes_match_spec_table() {
        assert_eq!(Violation::Auth("x".into()).status_code(), 401);
        assert_eq!(Violation::RateLimit("x".into()).status_code(), 429);
        assert_eq!(Violation::Model("x".into()).status_code(), 403);
        assert_eq!(Violation::Prompt("x".into()).status_code(), 400);
        assert_eq!(Violation::Tool("x".into()).status_code(), 400);
        assert_eq!(Violation::System("x".into()).status_code(), 503);
    }
}
