use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// These are process-wide fallbacks applied when a role's stored policy
// (see core_policy) leaves a field unset. They do not themselves grant
// or deny anything — a role with no stored policy at all is denied by
// default, per the policy enforcer's ordering.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefaultsConfig {
    /// Default daily token budget applied to a role with no explicit quota.
    #[serde(default)]
    pub default_daily_tokens: Option<u64>,
    /// Default daily cost budget (USD) applied to a role with no explicit quota.
    #[serde(default)]
    pub default_daily_cost_usd: Option<f64>,
    /// Regex patterns checked against inbound prompt text; a match is a
    /// policy violation regardless of role-specific prompt policy.
    #[serde(default = "d_denied_prompt_patterns")]
    pub denied_prompt_patterns: Vec<String>,
    /// Whether tool calling is permitted for roles that don't specify.
    #[serde(default = "d_true")]
    pub tool_calling_enabled: bool,
}

impl Default for PolicyDefaultsConfig {
    fn default() -> Self {
        Self {
            default_daily_tokens: None,
            default_daily_cost_usd: None,
            denied_prompt_patterns: d_denied_prompt_patterns(),
            tool_calling_enabled: d_true(),
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_denied_prompt_patterns() -> Vec<String> {
    vec![
        r"(?i)ignore (all )?previous instructions".into(),
        r"(?i)system prompt".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_tool_calling() {
        assert!(PolicyDefaultsConfig::default().tool_calling_enabled);
    }

    #[test]
    fn defaults_have_no_budgets() {
        let cfg = PolicyDefaultsConfig::default();
        assert!(cfg.default_daily_tokens.is_none());
        assert!(cfg.default_daily_cost_usd.is_none());
    }

    #[test]
    fn default_denied_patterns_are_non_empty() {
        assert!(!PolicyDefaultsConfig::default().denied_prompt_patterns.is_empty());
    }
}
