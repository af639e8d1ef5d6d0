//! Stream Multiplexer (§4.7): translates the raw, provider-agnostic
//! `StreamEvent` sequence into the gateway's `DispatchStreamEvent` wire
//! sequence, buffering enough state along the way to record usage/cost and
//! to populate the semantic cache once a cacheable stream finishes.
//!
//! Grounded on the teacher's background-task-draining-an-mpsc pattern for
//! SSE responses, generalized here to a lazy `async_stream::stream!` so the
//! HTTP layer can frame events as they arrive instead of waiting for a
//! channel to fill.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use core_domain::dispatch::{ChatCompletionResult, DispatchStreamEvent, FinishReason};
use core_domain::error::Result;
use core_domain::stream::{BoxStream, StreamEvent};
use core_domain::tool::ToolCall;

use crate::cache::SemanticCache;

fn map_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        Some("stop") | None => FinishReason::Stop,
        Some(_) => FinishReason::Stop,
    }
}

/// Parameters needed to populate the cache once a streamed response
/// finishes without any tool calls.
pub struct CacheWriteBack {
    pub cache: Arc<dyn SemanticCache>,
    pub key: String,
    pub ttl: Duration,
    pub provider_id: String,
    pub model: String,
}

/// Drives `upstream` to completion, yielding `DispatchStreamEvent`s in
/// order: zero or more `TextChunk`/`ToolCallEvent`, then at most one
/// `UsageEvent`, then exactly one `FinishEvent`, always last.
pub fn multiplex(
    upstream: BoxStream<'static, Result<StreamEvent>>,
    pricing_per_1m: Option<(f64, f64)>,
    write_back: Option<CacheWriteBack>,
) -> BoxStream<'static, DispatchStreamEvent> {
    Box::pin(async_stream::stream! {
        let mut upstream = upstream;
        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut pending_tool_names: HashMap<String, String> = HashMap::new();
        let started = Instant::now();

        use futures_util::StreamExt;
        while let Some(item) = upstream.next().await {
            match item {
                Ok(StreamEvent::Token { text }) => {
                    content.push_str(&text);
                    yield DispatchStreamEvent::TextChunk { delta: text };
                }
                Ok(StreamEvent::ToolCallStarted { call_id, tool_name }) => {
                    pending_tool_names.insert(call_id, tool_name);
                }
                Ok(StreamEvent::ToolCallDelta { .. }) => {
                    // Argument deltas are assembled by the provider adapter;
                    // the multiplexer only surfaces the finished call.
                }
                Ok(StreamEvent::ToolCallFinished { call_id, tool_name, arguments }) => {
                    pending_tool_names.remove(&call_id);
                    let call = ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    };
                    tool_calls.push(call.clone());
                    yield DispatchStreamEvent::ToolCallEvent(call);
                }
                Ok(StreamEvent::Done { usage, finish_reason }) => {
                    let cost_usd = match (&usage, pricing_per_1m) {
                        (Some(u), Some((input_per_1m, output_per_1m))) => {
                            (u.prompt_tokens as f64 * input_per_1m
                                + u.completion_tokens as f64 * output_per_1m)
                                / 1_000_000.0
                        }
                        _ => 0.0,
                    };
                    if let Some(u) = &usage {
                        yield DispatchStreamEvent::UsageEvent {
                            usage: u.clone(),
                            cost_usd,
                        };
                    }
                    let reason = map_finish_reason(finish_reason.as_deref());

                    if tool_calls.is_empty() {
                        if let Some(wb) = write_back {
                            let result = ChatCompletionResult {
                                content: if content.is_empty() { None } else { Some(content.clone()) },
                                tool_calls: vec![],
                                finish_reason: reason,
                                usage: usage.clone(),
                                cost_usd,
                                latency_ms: started.elapsed().as_millis() as u64,
                                provider_id: wb.provider_id,
                                model: wb.model,
                                cached: false,
                                stripped_tools: vec![],
                            };
                            wb.cache.put(wb.key, result, wb.ttl);
                        }
                    }

                    yield DispatchStreamEvent::FinishEvent { reason };
                    return;
                }
                Ok(StreamEvent::Error { message }) => {
                    warn!(error = %message, "provider stream error");
                    yield DispatchStreamEvent::PolicyViolationEvent { message };
                    yield DispatchStreamEvent::FinishEvent { reason: FinishReason::Error };
                    return;
                }
                Err(err) => {
                    warn!(%err, "provider stream failed");
                    yield DispatchStreamEvent::PolicyViolationEvent { message: err.to_string() };
                    yield DispatchStreamEvent::FinishEvent { reason: FinishReason::Error };
                    return;
                }
            }
        }

        // Upstream ended without a `Done` event (connection drop mid-stream).
        yield DispatchStreamEvent::FinishEvent { reason: FinishReason::Error };
    })
}

/// A one-shot stream carrying a single policy violation, used when the
/// policy enforcer rejects a streaming request after the client has
/// already been told to expect `text/event-stream`.
pub fn policy_violation_stream(message: String) -> BoxStream<'static, DispatchStreamEvent> {
    Box::pin(async_stream::stream! {
        yield DispatchStreamEvent::PolicyViolationEvent { message };
        yield DispatchStreamEvent::FinishEvent { reason: FinishReason::Error };
    })
}
