use std::collections::HashMap;

use chrono::{DateTime, Utc};
use core_domain::auth::RoleId;
use core_domain::tool_permission::{DiscoveredTool, PermissionStatus, ToolPermission};
use parking_lot::RwLock;
use uuid::Uuid;

/// Storage port for discovered tools and role-scoped tool permissions.
///
/// Kept synchronous: the in-memory implementation never suspends, and a
/// relational-backed implementation can wrap its own connection pool
/// internally (e.g. via `tokio::task::block_in_place`) without forcing
/// every call site in the policy enforcer to become async just for this.
pub trait ToolStore: Send + Sync {
    /// Look up or insert a tool by identity `(name, description, schema_hash)`,
    /// bumping `seen_count`/`last_seen_at` on a hit.
    fn upsert_seen(
        &self,
        name: &str,
        description: &str,
        schema_hash: &str,
        parameters: &serde_json::Value,
        first_seen_by: Option<String>,
        _api_key_id: Option<String>,
        now: DateTime<Utc>,
    ) -> DiscoveredTool;

    fn get_tool(&self, tool_id: Uuid) -> Option<DiscoveredTool>;

    /// All stored tools sharing a name (used for name-fallback resolution).
    fn find_by_name(&self, name: &str) -> Vec<DiscoveredTool>;

    fn get_permission(&self, role_id: &RoleId, tool_id: Uuid) -> Option<ToolPermission>;

    fn set_permission(&self, permission: ToolPermission);

    /// Set every currently-PENDING permission for `role_id` to `status`,
    /// returning the number of rows changed.
    fn set_all_pending(&self, role_id: &RoleId, status: PermissionStatus) -> usize;
}

#[derive(Default)]
struct Inner {
    tools_by_identity: HashMap<(String, String, String), Uuid>,
    tools_by_id: HashMap<Uuid, DiscoveredTool>,
    /// (role_id, tool_id) -> permission
    permissions: HashMap<(String, Uuid), ToolPermission>,
}

/// In-memory `ToolStore`, sufficient for a single-process gateway instance
/// or as the default wiring before a relational store is plugged in.
pub struct InMemoryToolStore {
    inner: RwLock<Inner>,
}

impl Default for InMemoryToolStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryToolStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl ToolStore for InMemoryToolStore {
    fn upsert_seen(
        &self,
        name: &str,
        description: &str,
        schema_hash: &str,
        parameters: &serde_json::Value,
        first_seen_by: Option<String>,
        _api_key_id: Option<String>,
        now: DateTime<Utc>,
    ) -> DiscoveredTool {
        let identity = (name.to_string(), description.to_string(), schema_hash.to_string());
        let mut inner = self.inner.write();

        if let Some(id) = inner.tools_by_identity.get(&identity).copied() {
            let tool = inner.tools_by_id.get_mut(&id).expect("identity index is consistent");
            tool.seen_count += 1;
            tool.last_seen_at = now;
            return tool.clone();
        }

        let tool = DiscoveredTool {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            schema_hash: schema_hash.to_string(),
            parameters: parameters.clone(),
            category: None,
            first_seen_at: now,
            first_seen_by,
            last_seen_at: now,
            seen_count: 1,
        };
        inner.tools_by_identity.insert(identity, tool.id);
        inner.tools_by_id.insert(tool.id, tool.clone());
        tool
    }

    fn get_tool(&self, tool_id: Uuid) -> Option<DiscoveredTool> {
        self.inner.read().tools_by_id.get(&tool_id).cloned()
    }

    fn find_by_name(&self, name: &str) -> Vec<DiscoveredTool> {
        self.inner
            .read()
            .tools_by_id
            .values()
            .filter(|t| t.name == name)
            .cloned()
            .collect()
    }

    fn get_permission(&self, role_id: &RoleId, tool_id: Uuid) -> Option<ToolPermission> {
        self.inner
            .read()
            .permissions
            .get(&(role_id.as_str().to_string(), tool_id))
            .cloned()
    }

    fn set_permission(&self, permission: ToolPermission) {
        let key = (permission.role_id.as_str().to_string(), permission.tool_id);
        self.inner.write().permissions.insert(key, permission);
    }

    fn set_all_pending(&self, role_id: &RoleId, status: PermissionStatus) -> usize {
        let mut inner = self.inner.write();
        let tool_ids: Vec<Uuid> = inner.tools_by_id.keys().copied().collect();
        let role_key = role_id.as_str().to_string();
        let mut changed = 0;
        for tool_id in tool_ids {
            let key = (role_key.clone(), tool_id);
            let is_pending = inner
                .permissions
                .get(&key)
                .map(|p| p.status == PermissionStatus::Pending)
                .unwrap_or(false);
            // Absent permissions default to PENDING (§3), so a bulk
            // operation must also cover tools with no row yet.
            let touches = is_pending || !inner.permissions.contains_key(&key);
            if touches {
                inner.permissions.insert(
                    key,
                    ToolPermission {
                        tool_id,
                        role_id: role_id.clone(),
                        status,
                        decider_id: None,
                        decider_email: None,
                        decided_at: Some(Utc::now()),
                        reason: None,
                    },
                );
                changed += 1;
            }
        }
        changed
    }
}
