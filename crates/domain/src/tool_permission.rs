use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::RoleId;

/// A tool the discovery service has seen at least once. Identity for
/// equality purposes is (name, description, schema_hash) — two tools
/// sharing only a name are distinct entities, though permissions fall
/// back across them by name (see `PermissionStatus` resolution rules,
/// implemented in the tool-discovery crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Deterministic hash over the canonicalized parameter schema.
    pub schema_hash: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub category: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub first_seen_by: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub seen_count: u64,
}

impl DiscoveredTool {
    pub fn identity_key(&self) -> (String, String, String) {
        (self.name.clone(), self.description.clone(), self.schema_hash.clone())
    }
}

/// Decision status for a (role, tool) pair. Ordered by restrictiveness for
/// the name-fallback resolution rule: REMOVED > DENIED > ALLOWED > PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionStatus {
    Allowed,
    Pending,
    Denied,
    Removed,
}

impl PermissionStatus {
    /// Restrictiveness rank used when picking among permissions for tools
    /// sharing a name: higher rank wins. REMOVED(3) > DENIED(2) > ALLOWED(1)
    /// > PENDING(0).
    pub fn restrictiveness_rank(&self) -> u8 {
        match self {
            PermissionStatus::Removed => 3,
            PermissionStatus::Denied => 2,
            PermissionStatus::Allowed => 1,
            PermissionStatus::Pending => 0,
        }
    }

    /// Pick the most-restrictive of two statuses per the name-fallback rule.
    pub fn most_restrictive(a: PermissionStatus, b: PermissionStatus) -> PermissionStatus {
        if a.restrictiveness_rank() >= b.restrictiveness_rank() {
            a
        } else {
            b
        }
    }
}

/// One per (role, tool). Default when absent is PENDING (or effectively
/// DENIED when the role's tool-calling policy requires approval).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPermission {
    pub tool_id: Uuid,
    pub role_id: RoleId,
    pub status: PermissionStatus,
    pub decider_id: Option<String>,
    pub decider_email: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl ToolPermission {
    pub fn pending(tool_id: Uuid, role_id: RoleId) -> Self {
        Self {
            tool_id,
            role_id,
            status: PermissionStatus::Pending,
            decider_id: None,
            decider_email: None,
            decided_at: None,
            reason: None,
        }
    }
}

/// Status recorded in a tool execution log entry — distinct from
/// `PermissionStatus` since a tool that was allowed can still fail to
/// execute; only the permission-related statuses are modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ToolExecutionStatus {
    Removed,
    Blocked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_outranks_denied_and_allowed() {
        assert_eq!(
            PermissionStatus::most_restrictive(PermissionStatus::Removed, PermissionStatus::Denied),
            PermissionStatus::Removed
        );
        assert_eq!(
            PermissionStatus::most_restrictive(PermissionStatus::Allowed, PermissionStatus::Removed),
            PermissionStatus::Removed
        );
    }

    #[test]
    fn denied_outranks_allowed_and_pending() {
        assert_eq!(
            PermissionStatus::most_restrictive(PermissionStatus::Denied, PermissionStatus::Allowed),
            PermissionStatus::Denied
        );
        assert_eq!(
            PermissionStatus::most_restrictive(PermissionStatus::Pending, PermissionStatus::Denied),
            PermissionStatus::Denied
        );
    }

    #[test]
    fn allowed_outranks_pending() {
        assert_eq!(
            PermissionStatus::most_restrictive(PermissionStatus::Pending, PermissionStatus::Allowed),
            PermissionStatus::Allowed
        );
    }
}
