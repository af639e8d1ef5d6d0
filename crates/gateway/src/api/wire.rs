//! OpenAI-compatible wire types for `POST /v1/chat/completions` (§6).
//!
//! Grounded on `api/openai_compat.rs`'s `OpenAIChatRequest`/`OpenAIMessage`,
//! generalized to the full content-part and tool shapes §6 calls for
//! (`messages[].content` as a string or an array of `text`/`image_url`
//! parts; `tools[].function`) rather than the teacher's plain-string-only
//! subset.

use serde::{Deserialize, Serialize};

use core_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};

#[derive(Debug, Deserialize)]
pub struct WireChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub tools: Vec<WireTool>,
    #[serde(default)]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
    #[serde(default)]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Deserialize)]
pub struct WireImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    pub function: WireToolCallFunction,
}

#[derive(Debug, Deserialize)]
pub struct WireToolCallFunction {
    pub name: String,
    /// Stringified JSON, per the OpenAI wire format.
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunction,
}

#[derive(Debug, Deserialize)]
pub struct WireFunction {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl From<WireTool> for ToolDefinition {
    fn from(t: WireTool) -> Self {
        ToolDefinition {
            name: t.function.name,
            description: t.function.description,
            parameters: t.function.parameters,
        }
    }
}

impl From<WireMessage> for Message {
    fn from(m: WireMessage) -> Self {
        let mut parts = match m.content {
            WireContent::Text(text) if m.tool_calls.is_empty() && m.tool_call_id.is_none() => {
                return Message {
                    role: m.role,
                    content: MessageContent::Text(text),
                };
            }
            WireContent::Text(text) => vec![ContentPart::Text { text }],
            WireContent::Parts(parts) => parts.into_iter().map(Into::into).collect(),
        };

        for call in m.tool_calls {
            let input = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::Null);
            parts.push(ContentPart::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }

        if let Some(tool_call_id) = m.tool_call_id {
            let content = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            parts = vec![ContentPart::ToolResult {
                tool_use_id: tool_call_id,
                content,
                is_error: false,
            }];
        }

        Message {
            role: m.role,
            content: MessageContent::Parts(parts),
        }
    }
}

impl From<WirePart> for ContentPart {
    fn from(p: WirePart) -> Self {
        match p {
            WirePart::Text { text } => ContentPart::Text { text },
            WirePart::ImageUrl { image_url } => ContentPart::Image {
                url: image_url.url,
                media_type: None,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
pub struct WireChatResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<WireChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Serialize)]
pub struct WireChoice {
    pub index: u32,
    pub message: WireResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct WireResponseMessage {
    pub role: &'static str,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireResponseToolCall>,
}

#[derive(Debug, Serialize)]
pub struct WireResponseToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireResponseFunction,
}

#[derive(Debug, Serialize)]
pub struct WireResponseFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ── Streaming chunk types ───────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct WireChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<WireChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct WireChunkChoice {
    pub index: u32,
    pub delta: WireChunkDelta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Default, Serialize)]
pub struct WireChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

fn finish_reason_str(reason: core_domain::dispatch::FinishReason) -> &'static str {
    use core_domain::dispatch::FinishReason;
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::Length => "length",
        FinishReason::Error => "error",
    }
}

impl WireChatResponse {
    pub fn from_result(
        id: String,
        created: i64,
        result: &core_domain::dispatch::ChatCompletionResult,
    ) -> Self {
        let tool_calls = result
            .tool_calls
            .iter()
            .map(|c| WireResponseToolCall {
                id: c.call_id.clone(),
                kind: "function",
                function: WireResponseFunction {
                    name: c.tool_name.clone(),
                    arguments: c.arguments.to_string(),
                },
            })
            .collect();

        WireChatResponse {
            id,
            object: "chat.completion",
            created,
            model: result.model.clone(),
            choices: vec![WireChoice {
                index: 0,
                message: WireResponseMessage {
                    role: "assistant",
                    content: result.content.clone(),
                    tool_calls,
                },
                finish_reason: finish_reason_str(result.finish_reason),
            }],
            usage: result.usage.as_ref().map(|u| WireUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_content_round_trips_as_text_variant() {
        let json = r#"{"role":"user","content":"hello"}"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        let msg: Message = wire.into();
        assert_eq!(msg.content.extract_all_text(), "hello");
        assert_eq!(msg.role, Role::User);
    }

    #[test]
    fn multipart_content_extracts_text_parts_only() {
        let json = r#"{
            "role": "user",
            "content": [
                {"type": "text", "text": "describe this"},
                {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}}
            ]
        }"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        let msg: Message = wire.into();
        assert_eq!(msg.content.extract_all_text(), "describe this");
    }

    #[test]
    fn tool_message_becomes_tool_result_part() {
        let json = r#"{"role":"tool","content":"42","tool_call_id":"call_1"}"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        let msg: Message = wire.into();
        match msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(&parts[0], ContentPart::ToolResult { tool_use_id, .. } if tool_use_id == "call_1"));
            }
            other => panic!("expected Parts, got {other:?}"),
        }
    }

    #[test]
    fn wire_tool_converts_to_tool_definition() {
        let json = r#"{"type":"function","function":{"name":"search_web","description":"search","parameters":{"type":"object"}}}"#;
        let wire: WireTool = serde_json::from_str(json).unwrap();
        let def: ToolDefinition = wire.into();
        assert_eq!(def.name, "search_web");
    }
}
