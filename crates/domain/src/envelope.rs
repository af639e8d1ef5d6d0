use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{ApiKeyId, GroupId, RoleId, TenantId};
use crate::tool::{Message, ToolDefinition};

/// The chat payload carried by a request, independent of auth/priority/
/// dispatch bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub tool_choice: Option<serde_json::Value>,
}

/// Request priority on a 0-10 scale. Values outside the range are clamped
/// at construction so a malformed client value can never bypass the
/// queue-selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 10;
    pub const DEFAULT: u8 = 4;

    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Queue selection rule from §4.1: priority >= 8 -> high, >= 4 -> normal,
    /// else low.
    pub fn queue_class(&self) -> QueueClass {
        if self.0 >= 8 {
            QueueClass::High
        } else if self.0 >= 4 {
            QueueClass::Normal
        } else {
            QueueClass::Low
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueClass {
    High,
    Normal,
    Low,
}

/// Carries one user request plus auth context and priority. Owned by the
/// dispatcher from submission until a result is published; the reply
/// channel itself is not modeled here (it depends on the async runtime and
/// lives alongside this envelope in the dispatch crate) — this type is
/// deliberately plain data so it stays usable from tests without pulling
/// in tokio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: Uuid,
    pub chat_payload: ChatPayload,
    pub tenant_id: TenantId,
    pub tenant_slug: Option<String>,
    pub api_key_id: ApiKeyId,
    pub role_id: Option<RoleId>,
    pub group_id: Option<GroupId>,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

impl RequestEnvelope {
    pub fn new(
        chat_payload: ChatPayload,
        tenant_id: TenantId,
        api_key_id: ApiKeyId,
        priority: Priority,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            chat_payload,
            tenant_id,
            tenant_slug: None,
            api_key_id,
            role_id: None,
            group_id: None,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_clamps_above_max() {
        assert_eq!(Priority::new(255).value(), 10);
    }

    #[test]
    fn priority_queue_class_thresholds() {
        assert_eq!(Priority::new(10).queue_class(), QueueClass::High);
        assert_eq!(Priority::new(8).queue_class(), QueueClass::High);
        assert_eq!(Priority::new(7).queue_class(), QueueClass::Normal);
        assert_eq!(Priority::new(4).queue_class(), QueueClass::Normal);
        assert_eq!(Priority::new(3).queue_class(), QueueClass::Low);
        assert_eq!(Priority::new(0).queue_class(), QueueClass::Low);
    }

    #[test]
    fn default_priority_is_normal() {
        assert_eq!(Priority::default().queue_class(), QueueClass::Normal);
    }
}
