//! `POST /v1/chat/completions` (§6): the OpenAI-compatible admission
//! route. Builds a `RequestEnvelope` from the wire request plus the
//! `AuthContext` the auth middleware resolved, submits it to the
//! dispatcher, and frames the result — either a single JSON body or an
//! SSE stream — in the OpenAI wire shape.
//!
//! Grounded on `api/openai_compat.rs`'s `chat_completions` dispatch to
//! blocking/streaming handlers and `make_openai_sse_stream`'s chunk
//! framing (prologue role chunk, per-delta content chunks, terminal
//! `[DONE]`).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use uuid::Uuid;

use core_domain::auth::AuthContext;
use core_domain::dispatch::{DispatchOutcome, DispatchStreamEvent, FinishReason};
use core_domain::envelope::{ChatPayload, Priority, RequestEnvelope};
use core_domain::error::Error;

use crate::api::wire::{
    WireChatRequest, WireChatResponse, WireChunk, WireChunkChoice, WireChunkDelta,
};
use crate::state::AppState;

const PRIORITY_HEADER: &str = "x-modelgate-priority";
const REMOVED_TOOLS_HEADER: &str = "x-modelgate-removed-tools";
const WARNING_HEADER: &str = "x-modelgate-warning";

/// §4.7 write-deadline: a stream that receives no upstream event for this
/// long is dropped rather than held open indefinitely.
const STREAM_WRITE_DEADLINE: Duration = Duration::from_secs(30 * 60);
/// Deadline is pushed back out by `STREAM_WRITE_DEADLINE` every this many
/// chunks, so a slow-but-alive provider isn't cut off mid-stream.
const STREAM_DEADLINE_EXTEND_EVERY: u32 = 50;

fn priority_from_headers(headers: &HeaderMap) -> Priority {
    headers
        .get(PRIORITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u8>().ok())
        .map(Priority::new)
        .unwrap_or_default()
}

fn error_response(err: Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Json(serde_json::json!({
        "error": {
            "type": err.error_type(),
            "message": err.to_string(),
        }
    }));
    let mut response = (status, body).into_response();
    if let Some(secs) = err.retry_after_secs() {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
        }
    }
    response
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(wire): Json<WireChatRequest>,
) -> Response {
    let priority = priority_from_headers(&headers);
    let streaming = wire.stream;
    let model = wire.model.clone();

    let chat_payload = ChatPayload {
        model: wire.model,
        messages: wire.messages.into_iter().map(Into::into).collect(),
        tools: wire.tools.into_iter().map(Into::into).collect(),
        stream: streaming,
        max_tokens: wire.max_tokens,
        temperature: wire.temperature,
        tool_choice: wire.tool_choice,
    };

    let mut envelope =
        RequestEnvelope::new(chat_payload, auth.tenant_id, auth.api_key_id, priority);
    envelope.role_id = auth.role_id;
    envelope.group_id = auth.group_id;

    let outcome = state.dispatcher.submit_and_await(envelope).await;

    match outcome {
        Ok(DispatchOutcome::Complete(result)) => {
            let created = chrono::Utc::now().timestamp();
            let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
            let body = WireChatResponse::from_result(id, created, &result);
            let mut response = Json(body).into_response();
            if !result.stripped_tools.is_empty() {
                let joined = result.stripped_tools.join(",");
                if let Ok(value) = HeaderValue::from_str(&joined) {
                    response.headers_mut().insert(REMOVED_TOOLS_HEADER, value);
                }
                let warning = format!(
                    "{} tool(s) removed from request",
                    result.stripped_tools.len()
                );
                if let Ok(value) = HeaderValue::from_str(&warning) {
                    response.headers_mut().insert(WARNING_HEADER, value);
                }
            }
            response
        }
        Ok(DispatchOutcome::Stream(stream)) => stream_response(stream, model).into_response(),
        Err(err) => error_response(err),
    }
}

/// Frames one upstream dispatch event into an SSE data event in the
/// OpenAI wire chunk shape. Returns `None` for events with no wire
/// representation (usage accounting, tool-call deltas).
fn frame_event(
    id: &str,
    created: i64,
    model: &str,
    event: DispatchStreamEvent,
) -> Option<Event> {
    let (delta, finish_reason) = match event {
        DispatchStreamEvent::TextChunk { delta } => (
            WireChunkDelta {
                content: Some(delta),
                ..Default::default()
            },
            None,
        ),
        DispatchStreamEvent::ToolCallEvent(_call) => {
            // Tool-call deltas are not yet wire-framed for the streaming
            // path (§4.7 — non-streaming carries the full tool_calls
            // array; this gateway sends streamed tool calls as a single
            // finish event instead of incremental argument chunks).
            return None;
        }
        DispatchStreamEvent::UsageEvent { .. } => return None,
        DispatchStreamEvent::PolicyViolationEvent { message } => (
            WireChunkDelta {
                content: Some(format!("Error: {message}")),
                ..Default::default()
            },
            None,
        ),
        DispatchStreamEvent::FinishEvent { reason } => (
            WireChunkDelta::default(),
            Some(match reason {
                FinishReason::Stop => "stop",
                FinishReason::Error => "error",
                FinishReason::ToolCalls => "tool_calls",
                FinishReason::Length => "length",
            }),
        ),
    };

    Some(Event::default().data(
        serde_json::to_string(&WireChunk {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![WireChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        })
        .unwrap_or_default(),
    ))
}

fn stream_response(
    stream: core_domain::stream::BoxStream<'static, DispatchStreamEvent>,
    model: String,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    // Drains the upstream provider stream on its own task, decoupled from
    // whatever the HTTP client does with the SSE response. A slow or
    // disconnected client only stops filling its own channel buffer — it
    // never blocks the provider read, since the send side is unbounded
    // and a dropped receiver just makes `send` a silent no-op.
    tokio::spawn(async move {
        let _ = tx.send(Event::default().data(
            serde_json::to_string(&WireChunk {
                id: id.clone(),
                object: "chat.completion.chunk",
                created,
                model: model.clone(),
                choices: vec![WireChunkChoice {
                    index: 0,
                    delta: WireChunkDelta {
                        role: Some("assistant"),
                        ..Default::default()
                    },
                    finish_reason: None,
                }],
            })
            .unwrap_or_default(),
        ));

        let mut upstream = stream;
        let mut deadline = TokioInstant::now() + STREAM_WRITE_DEADLINE;
        let mut chunks_since_extend: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("stream exceeded write deadline, terminating");
                    let _ = tx.send(Event::default().data(
                        serde_json::to_string(&WireChunk {
                            id: id.clone(),
                            object: "chat.completion.chunk",
                            created,
                            model: model.clone(),
                            choices: vec![WireChunkChoice {
                                index: 0,
                                delta: WireChunkDelta::default(),
                                finish_reason: Some("error"),
                            }],
                        })
                        .unwrap_or_default(),
                    ));
                    let _ = tx.send(Event::default().data("[DONE]"));
                    break;
                }
                next = upstream.next() => {
                    let Some(event) = next else { break };

                    chunks_since_extend += 1;
                    if chunks_since_extend >= STREAM_DEADLINE_EXTEND_EVERY {
                        deadline = TokioInstant::now() + STREAM_WRITE_DEADLINE;
                        chunks_since_extend = 0;
                    }

                    let is_finish = matches!(event, DispatchStreamEvent::FinishEvent { .. });
                    if let Some(framed) = frame_event(&id, created, &model, event) {
                        let _ = tx.send(framed);
                    }
                    if is_finish {
                        let _ = tx.send(Event::default().data("[DONE]"));
                        break;
                    }
                }
            }
        }
    });

    let framed = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(event);
        }
    };

    Sse::new(framed).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_priority_header_defaults_to_normal() {
        let headers = HeaderMap::new();
        assert_eq!(priority_from_headers(&headers), Priority::default());
    }

    #[test]
    fn priority_header_is_parsed_and_clamped() {
        let mut headers = HeaderMap::new();
        headers.insert(PRIORITY_HEADER, HeaderValue::from_static("9"));
        assert_eq!(priority_from_headers(&headers).value(), 9);

        let mut headers = HeaderMap::new();
        headers.insert(PRIORITY_HEADER, HeaderValue::from_static("255"));
        assert_eq!(priority_from_headers(&headers).value(), 10);
    }

    #[test]
    fn unparseable_priority_header_falls_back_to_default() {
        let mut headers = HeaderMap::new();
        headers.insert(PRIORITY_HEADER, HeaderValue::from_static("not-a-number"));
        assert_eq!(priority_from_headers(&headers), Priority::default());
    }

    #[test]
    fn queue_full_error_response_carries_retry_after() {
        let response = error_response(Error::QueueFull);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(axum::http::header::RETRY_AFTER).unwrap(),
            "5"
        );
    }

    #[test]
    fn policy_violation_error_response_has_no_retry_after() {
        use core_domain::policy::Violation;
        let response = error_response(Error::Policy(Violation::Model("bad model".into())));
        assert!(response.headers().get(axum::http::header::RETRY_AFTER).is_none());
    }
}
