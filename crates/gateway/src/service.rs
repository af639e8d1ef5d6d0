//! The gateway service: the `RequestProcessor` the dispatcher's worker
//! pool drives for every admitted envelope. Implements the admission
//! pipeline's core turn — `ChatComplete` and `ChatStream` — exactly as
//! described for the non-streaming and streaming paths: policy →
//! cache → routing → provider call → cache write-back → usage/trace
//! recording.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use core_domain::auth::AuthContext;
use core_domain::config::{Config, RoutingProfile};
use core_domain::dispatch::{ChatCompletionResult, DispatchOutcome, DispatchResult, FinishReason};
use core_domain::envelope::RequestEnvelope;
use core_domain::error::{Error, Result};
use core_domain::policy::RolePolicy;
use core_domain::tool::{Message, Role};
use core_domain::tool_permission::ToolExecutionStatus;
use core_domain::trace::TraceEvent;
use core_domain::usage::UsageRecord;

use core_dispatch::{CancelToken, RequestProcessor};
use core_policy::{PolicyEnforcer, PolicyRequest};
use core_providers::router::LlmRouter;
use core_providers::traits::ChatRequest;
use core_store::{RoleRepository, ToolExecutionLogEntry, ToolExecutionLogRepository, UsageRepository};

use crate::cache::{cache_key, SemanticCache};
use crate::router_port::{record_switch_if_changed, IntelligentRouter};
use crate::stream::{multiplex, CacheWriteBack};

/// Every collaborator the service's two turn algorithms need. Held behind
/// `Arc`s so cloning the service is cheap (the dispatcher clones the
/// `Arc<dyn RequestProcessor>`, not this struct, but the fields are kept
/// this way for symmetry with the rest of the admission path).
pub struct GatewayService {
    config: Arc<Config>,
    router: Arc<LlmRouter>,
    intelligent_router: Arc<dyn IntelligentRouter>,
    policy: Arc<PolicyEnforcer>,
    roles: Arc<dyn RoleRepository>,
    usage: Arc<dyn UsageRepository>,
    tool_log: Arc<dyn ToolExecutionLogRepository>,
    cache: Arc<dyn SemanticCache>,
}

impl GatewayService {
    pub fn new(
        config: Arc<Config>,
        router: Arc<LlmRouter>,
        intelligent_router: Arc<dyn IntelligentRouter>,
        policy: Arc<PolicyEnforcer>,
        roles: Arc<dyn RoleRepository>,
        usage: Arc<dyn UsageRepository>,
        tool_log: Arc<dyn ToolExecutionLogRepository>,
        cache: Arc<dyn SemanticCache>,
    ) -> Self {
        Self {
            config,
            router,
            intelligent_router,
            policy,
            roles,
            usage,
            tool_log,
            cache,
        }
    }

    /// §4.5 / §4.6 shared lead-in: evaluate policy, and if it passes,
    /// resolve the effective `(profile, request)` to send downstream.
    /// Returns the role's policy (for the caching/routing/budget decisions
    /// that follow) alongside the policy outcome's allowed tool list.
    async fn admit(
        &self,
        envelope: &RequestEnvelope,
    ) -> std::result::Result<(Vec<Message>, String, Option<RolePolicy>, core_policy::PolicyOutcome), Error> {
        let auth = AuthContext {
            tenant_id: envelope.tenant_id.clone(),
            api_key_id: envelope.api_key_id.clone(),
            role_id: envelope.role_id.clone(),
            group_id: envelope.group_id.clone(),
        };

        let prompt_text = envelope
            .chat_payload
            .messages
            .iter()
            .map(|m| m.content.extract_all_text())
            .collect::<Vec<_>>()
            .join("\n");

        let policy_req = PolicyRequest {
            request_id: envelope.request_id,
            auth,
            model: envelope.chat_payload.model.clone(),
            prompt_text,
            tools: envelope.chat_payload.tools.clone(),
        };

        let outcome = self.policy.evaluate(&policy_req).await?;

        for removed in &outcome.removed_tool_entries {
            self.tool_log
                .record(ToolExecutionLogEntry {
                    request_id: envelope.request_id,
                    tool_name: removed.clone(),
                    role_id: envelope.role_id.clone().unwrap_or_else(|| "unknown".into()),
                    api_key_id: envelope.api_key_id.clone(),
                    status: ToolExecutionStatus::Removed,
                    recorded_at: chrono::Utc::now(),
                })
                .await;
        }

        let role_policy = match &envelope.role_id {
            Some(role_id) => self.roles.get_policy(role_id).await,
            None => None,
        };

        Ok((envelope.chat_payload.messages.clone(), envelope.chat_payload.model.clone(), role_policy, outcome))
    }

    /// Whether any message in the conversation carries the `tool` role —
    /// such turns are never cached, per the caching exclusion rule.
    fn conversation_has_tool_message(messages: &[Message]) -> bool {
        messages.iter().any(|m| m.role == Role::Tool)
    }

    fn pricing_for(&self, model: &str) -> Option<(f64, f64)> {
        self.config
            .llm
            .pricing
            .get(model)
            .map(|p| (p.input_per_1m, p.output_per_1m))
    }

    /// Resolves the (profile, model-override) pair to dispatch with, after
    /// consulting the intelligent router if the role enables it. Returns
    /// the profile name the `LlmRouter` should use (the role config key)
    /// unchanged — only an explicit model override travels separately,
    /// since `LlmRouter::chat_with_profile` resolves providers from the
    /// profile's own config rather than a free-form model string.
    fn maybe_route(&self, requested_model: &str, role_policy: Option<&RolePolicy>) -> String {
        let routing_enabled = role_policy.and_then(|p| p.routing.as_ref()).map(|r| r.enabled).unwrap_or(false);
        if !routing_enabled {
            return requested_model.to_string();
        }
        let decision = self.intelligent_router.route(None, RoutingProfile::Auto);
        if decision.model.is_empty() {
            return requested_model.to_string();
        }
        record_switch_if_changed(requested_model, &decision);
        decision.model
    }

    async fn record_usage(&self, envelope: &RequestEnvelope, result: &Result<ChatCompletionResult>) {
        let record = match result {
            Ok(r) => UsageRecord {
                id: Uuid::new_v4(),
                api_key_id: envelope.api_key_id.clone(),
                request_id: envelope.request_id,
                model: r.model.clone(),
                provider: r.provider_id.clone(),
                input_tokens: r.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                output_tokens: r.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
                total_tokens: r.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
                cost_usd: r.cost_usd,
                latency_ms: r.latency_ms,
                success: r.finish_reason.is_success(),
                error_code: None,
                error_message: None,
                tool_call_count: r.tool_calls.len() as u32,
                metadata: serde_json::Value::Null,
                created_at: chrono::Utc::now(),
            },
            Err(e) => UsageRecord {
                id: Uuid::new_v4(),
                api_key_id: envelope.api_key_id.clone(),
                request_id: envelope.request_id,
                model: envelope.chat_payload.model.clone(),
                provider: String::new(),
                input_tokens: 0,
                output_tokens: 0,
                total_tokens: 0,
                cost_usd: 0.0,
                latency_ms: 0,
                success: false,
                error_code: Some(e.error_type().to_string()),
                error_message: Some(e.to_string()),
                tool_call_count: 0,
                metadata: serde_json::Value::Null,
                created_at: chrono::Utc::now(),
            },
        };
        self.usage.record(record).await;
    }

    // ── ChatComplete ─────────────────────────────────────────────────

    async fn chat_complete(&self, envelope: &RequestEnvelope, cancel: CancelToken) -> DispatchResult {
        let (messages, profile, role_policy, outcome) = self.admit(envelope).await?;

        let cacheable = outcome.allowed_tools.is_empty() && !Self::conversation_has_tool_message(&messages);
        let caching_enabled = role_policy.as_ref().and_then(|p| p.caching.as_ref()).map(|c| c.enabled).unwrap_or(true);
        let ttl_secs = role_policy.as_ref().and_then(|p| p.caching.as_ref()).and_then(|c| c.ttl_secs).unwrap_or(300);

        let key = cache_key(&profile, &envelope.chat_payload.model, &messages);
        if caching_enabled && cacheable {
            if let Some(mut hit) = self.cache.get(&key) {
                TraceEvent::CacheHit {
                    role_id: envelope.role_id.as_ref().map(|r| r.as_str().to_string()).unwrap_or_default(),
                    model: envelope.chat_payload.model.clone(),
                }
                .emit();
                hit.cached = true;
                hit.stripped_tools = outcome.stripped_tools.clone();
                return Ok(DispatchOutcome::Complete(hit));
            }
            TraceEvent::CacheMiss {
                role_id: envelope.role_id.as_ref().map(|r| r.as_str().to_string()).unwrap_or_default(),
                model: envelope.chat_payload.model.clone(),
            }
            .emit();
        }

        let effective_model = self.maybe_route(&envelope.chat_payload.model, role_policy.as_ref());

        let req = ChatRequest {
            messages: messages.clone(),
            tools: outcome.allowed_tools.clone(),
            temperature: envelope.chat_payload.temperature,
            max_tokens: envelope.chat_payload.max_tokens,
            json_mode: false,
            model: None,
        };

        let started = std::time::Instant::now();
        let result = tokio::select! {
            biased;
            _ = wait_cancelled(&cancel) => Err(Error::ContextCancelled),
            r = self.router.chat_with_profile(&effective_model, req) => r,
        };

        match result {
            Ok(resp) => {
                let pricing = self.pricing_for(&resp.model);
                let cost_usd = match (&resp.usage, pricing) {
                    (Some(u), Some((in_rate, out_rate))) => {
                        core_domain::config::ModelPricing { input_per_1m: in_rate, output_per_1m: out_rate }
                            .estimate_cost(u.prompt_tokens, u.completion_tokens)
                    }
                    _ => 0.0,
                };
                let finish_reason = map_finish(resp.finish_reason.as_deref());
                let completion = ChatCompletionResult {
                    content: if resp.content.is_empty() { None } else { Some(resp.content) },
                    tool_calls: resp.tool_calls.clone(),
                    finish_reason,
                    usage: resp.usage.clone(),
                    cost_usd,
                    latency_ms: started.elapsed().as_millis() as u64,
                    provider_id: profile.clone(),
                    model: resp.model.clone(),
                    cached: false,
                    stripped_tools: outcome.stripped_tools.clone(),
                };

                TraceEvent::HealthEvent {
                    provider: completion.provider_id.clone(),
                    model: completion.model.clone(),
                    success: true,
                }
                .emit();

                if caching_enabled && cacheable && completion.tool_calls.is_empty() {
                    self.cache.put(key, completion.clone(), Duration::from_secs(ttl_secs));
                }

                for call in &completion.tool_calls {
                    TraceEvent::ToolPermissionDecision {
                        tool_name: call.tool_name.clone(),
                        role_id: envelope.role_id.as_ref().map(|r| r.as_str().to_string()).unwrap_or_default(),
                        status: "EXECUTED".to_string(),
                    }
                    .emit();
                }

                let outcome_result = Ok(completion);
                self.record_usage(envelope, &outcome_result).await;
                Ok(DispatchOutcome::Complete(outcome_result.unwrap()))
            }
            Err(e) => {
                TraceEvent::HealthEvent {
                    provider: profile.clone(),
                    model: envelope.chat_payload.model.clone(),
                    success: false,
                }
                .emit();
                let outcome_result: Result<ChatCompletionResult> = Err(error_clone(&e));
                self.record_usage(envelope, &outcome_result).await;
                Err(e)
            }
        }
    }

    // ── ChatStream ───────────────────────────────────────────────────

    async fn chat_stream(&self, envelope: &RequestEnvelope, cancel: CancelToken) -> DispatchResult {
        let (messages, profile, role_policy, outcome) = self.admit(envelope).await?;

        let cacheable = outcome.allowed_tools.is_empty() && !Self::conversation_has_tool_message(&messages);
        let caching_enabled = role_policy.as_ref().and_then(|p| p.caching.as_ref()).map(|c| c.enabled).unwrap_or(true);
        let ttl_secs = role_policy.as_ref().and_then(|p| p.caching.as_ref()).and_then(|c| c.ttl_secs).unwrap_or(300);
        let key = cache_key(&profile, &envelope.chat_payload.model, &messages);

        if caching_enabled && cacheable {
            if let Some(hit) = self.cache.get(&key) {
                TraceEvent::CacheHit {
                    role_id: envelope.role_id.as_ref().map(|r| r.as_str().to_string()).unwrap_or_default(),
                    model: envelope.chat_payload.model.clone(),
                }
                .emit();
                return Ok(DispatchOutcome::Stream(Box::pin(async_stream::stream! {
                    if let Some(content) = hit.content {
                        yield core_domain::dispatch::DispatchStreamEvent::TextChunk { delta: content };
                    }
                    yield core_domain::dispatch::DispatchStreamEvent::FinishEvent { reason: hit.finish_reason };
                })));
            }
            TraceEvent::CacheMiss {
                role_id: envelope.role_id.as_ref().map(|r| r.as_str().to_string()).unwrap_or_default(),
                model: envelope.chat_payload.model.clone(),
            }
            .emit();
        }

        let effective_model = self.maybe_route(&envelope.chat_payload.model, role_policy.as_ref());

        let req = ChatRequest {
            messages: messages.clone(),
            tools: outcome.allowed_tools.clone(),
            temperature: envelope.chat_payload.temperature,
            max_tokens: envelope.chat_payload.max_tokens,
            json_mode: false,
            model: None,
        };

        let stream_result = tokio::select! {
            biased;
            _ = wait_cancelled(&cancel) => Err(Error::ContextCancelled),
            r = self.router.chat_stream_with_profile(&effective_model, req) => r,
        };

        let (provider_id, model, upstream) = match stream_result {
            Ok(v) => v,
            Err(e) => {
                TraceEvent::HealthEvent { provider: profile.clone(), model: envelope.chat_payload.model.clone(), success: false }.emit();
                return Err(e);
            }
        };

        let pricing = self.pricing_for(&model);
        let write_back = if caching_enabled && cacheable {
            Some(CacheWriteBack {
                cache: self.cache.clone(),
                key,
                ttl: Duration::from_secs(ttl_secs),
                provider_id: provider_id.clone(),
                model: model.clone(),
            })
        } else {
            None
        };

        let usage = self.usage.clone();
        let api_key_id = envelope.api_key_id.clone();
        let request_id = envelope.request_id;
        let request_model = envelope.chat_payload.model.clone();
        let cancel_for_stream = cancel;

        let events = multiplex(upstream, pricing, write_back);
        let metered = meter_and_record(events, usage, api_key_id, request_id, request_model, provider_id, cancel_for_stream);

        Ok(DispatchOutcome::Stream(metered))
    }
}

fn map_finish(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        Some(_) | None => FinishReason::Stop,
    }
}

fn error_clone(e: &Error) -> Error {
    Error::Other(e.to_string())
}

async fn wait_cancelled(cancel: &CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Wraps the already-multiplexed event stream to additionally record one
/// usage row and tool-call trace events once the turn finishes — the
/// bookkeeping §4.6 describes the background task doing alongside event
/// forwarding.
fn meter_and_record(
    mut events: core_domain::stream::BoxStream<'static, core_domain::dispatch::DispatchStreamEvent>,
    usage: Arc<dyn UsageRepository>,
    api_key_id: core_domain::auth::ApiKeyId,
    request_id: Uuid,
    model: String,
    provider_id: String,
    cancel: CancelToken,
) -> core_domain::stream::BoxStream<'static, core_domain::dispatch::DispatchStreamEvent> {
    use core_domain::dispatch::DispatchStreamEvent;
    use futures_util::StreamExt;

    Box::pin(async_stream::stream! {
        let started = std::time::Instant::now();
        let mut prompt_tokens = 0u32;
        let mut completion_tokens = 0u32;
        let mut total_tokens = 0u32;
        let mut cost_usd = 0.0f64;
        let mut tool_call_count = 0u32;
        let mut success = true;

        while let Some(event) = events.next().await {
            if cancel.is_cancelled() {
                warn!(request_id = %request_id, "stream cancelled by caller, stopping upstream drain");
                break;
            }
            match &event {
                DispatchStreamEvent::UsageEvent { usage: u, cost_usd: c } => {
                    prompt_tokens = u.prompt_tokens;
                    completion_tokens = u.completion_tokens;
                    total_tokens = u.total_tokens;
                    cost_usd = *c;
                }
                DispatchStreamEvent::ToolCallEvent(_) => {
                    tool_call_count += 1;
                }
                DispatchStreamEvent::FinishEvent { reason } => {
                    success = reason.is_success();
                }
                _ => {}
            }
            yield event;
        }

        usage
            .record(UsageRecord {
                id: Uuid::new_v4(),
                api_key_id,
                request_id,
                model,
                provider: provider_id,
                input_tokens: prompt_tokens,
                output_tokens: completion_tokens,
                total_tokens,
                cost_usd,
                latency_ms: started.elapsed().as_millis() as u64,
                success,
                error_code: None,
                error_message: None,
                tool_call_count,
                metadata: serde_json::Value::Null,
                created_at: chrono::Utc::now(),
            })
            .await;
    })
}

#[async_trait]
impl RequestProcessor for GatewayService {
    async fn process(&self, envelope: RequestEnvelope, cancel: CancelToken) -> DispatchResult {
        if envelope.chat_payload.stream {
            self.chat_stream(&envelope, cancel).await
        } else {
            self.chat_complete(&envelope, cancel).await
        }
    }
}
