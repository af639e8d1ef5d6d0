//! `IntelligentRouter` — the optional routing step of §4.5/§4.6 step 4.
//!
//! Grounded on `core_providers::smart_router`'s pure tier-resolution
//! functions. Embedding-based classification of the `Auto` profile is out
//! of scope (see Non-goals): an `Auto` request simply falls through to the
//! `resolve_model_for_request` default (the `Complex` tier), same as when
//! no classifier result is available.

use core_domain::config::{ModelTier, RoutingProfile, RouterConfig};
use core_domain::trace::TraceEvent;

use core_providers::smart_router::{resolve_model_for_request, RoutingDecision};

/// Resolves a `(provider, model)` candidate ahead of the primary dispatch
/// attempt. The gateway service only consults this when a role's
/// `RoutingPolicy.enabled` is true; otherwise the role's configured model
/// profile is used directly.
pub trait IntelligentRouter: Send + Sync {
    fn route(&self, explicit_model: Option<&str>, profile: RoutingProfile) -> RoutingDecision;
}

/// Tier-table router backed by a role's `[llm.router]` config.
pub struct TierRouter {
    config: RouterConfig,
}

impl TierRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }
}

impl IntelligentRouter for TierRouter {
    fn route(&self, explicit_model: Option<&str>, profile: RoutingProfile) -> RoutingDecision {
        // No embedding classifier wired up; `Auto` always falls through to
        // the pure function's built-in `Complex` default.
        let classified_tier: Option<ModelTier> = None;
        resolve_model_for_request(explicit_model, profile, classified_tier, &self.config.tiers)
    }
}

/// Records a model-switch trace event when routing picked a model other
/// than the one the role config would otherwise have used.
pub fn record_switch_if_changed(from_model: &str, decision: &RoutingDecision) {
    if !decision.bypassed && decision.model != from_model && !decision.model.is_empty() {
        TraceEvent::ModelSwitch {
            from_model: from_model.to_string(),
            to_model: decision.model.clone(),
            reason: format!("router selected {:?} tier for {:?} profile", decision.tier, decision.profile),
        }
        .emit();
    }
}
