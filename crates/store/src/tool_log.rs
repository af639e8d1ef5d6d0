//! Tool execution log sink (persisted-state: "tool execution logs").
//! Every tool the policy enforcer removes or denies gets one row here,
//! independent of the `UsageRepository` row recorded for the turn itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use core_domain::auth::{ApiKeyId, RoleId};
use core_domain::tool_permission::ToolExecutionStatus;

#[derive(Debug, Clone)]
pub struct ToolExecutionLogEntry {
    pub request_id: Uuid,
    pub tool_name: String,
    pub role_id: RoleId,
    pub api_key_id: ApiKeyId,
    pub status: ToolExecutionStatus,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait ToolExecutionLogRepository: Send + Sync {
    async fn record(&self, entry: ToolExecutionLogEntry);
}

/// In-memory sink, bounded like the usage repository.
pub struct InMemoryToolExecutionLogRepository {
    entries: RwLock<Vec<ToolExecutionLogEntry>>,
    capacity: usize,
}

impl Default for InMemoryToolExecutionLogRepository {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemoryToolExecutionLogRepository {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity,
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<ToolExecutionLogEntry> {
        let entries = self.entries.read();
        entries.iter().rev().take(limit).cloned().collect()
    }
}

#[async_trait]
impl ToolExecutionLogRepository for InMemoryToolExecutionLogRepository {
    async fn record(&self, entry: ToolExecutionLogEntry) {
        let mut entries = self.entries.write();
        entries.push(entry);
        if entries.len() > self.capacity {
            let overflow = entries.len() - self.capacity;
            entries.drain(0..overflow);
        }
    }
}
