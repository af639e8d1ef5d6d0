//! Tool discovery and permission resolution.
//!
//! Hashes each incoming tool's schema into a stable identity, records
//! first/last-seen bookkeeping, and resolves a role's permission for a
//! tool with a name-based fallback: setting a single `REMOVED` decision
//! for any schema variant of a tool named `X` suppresses every other
//! variant of `X` for that role.

pub mod schema_hash;
pub mod store;

use std::sync::Arc;

use core_domain::auth::RoleId;
use core_domain::tool::ToolDefinition;
use core_domain::tool_permission::{DiscoveredTool, PermissionStatus, ToolPermission};
use uuid::Uuid;

pub use schema_hash::schema_hash;
pub use store::{InMemoryToolStore, ToolStore};

/// A discovered tool paired with the permission resolved for it under one
/// role — the unit the policy enforcer consumes.
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub tool: DiscoveredTool,
    pub status: PermissionStatus,
}

/// Tool discovery and permission resolution, backed by a pluggable store.
pub struct ToolDiscoveryService {
    store: Arc<dyn ToolStore>,
}

impl ToolDiscoveryService {
    pub fn new(store: Arc<dyn ToolStore>) -> Self {
        Self { store }
    }

    /// Record (or bump) every tool in `defs`, returning the stored rows.
    ///
    /// Mirrors §4.4 `Discover`: identity is (name, description, schema-hash);
    /// a match bumps `seen_count`/`last_seen_at`, a miss inserts fresh.
    pub fn discover(
        &self,
        defs: &[ToolDefinition],
        role_id: Option<&RoleId>,
        api_key_id: Option<&str>,
    ) -> Vec<DiscoveredTool> {
        let now = chrono::Utc::now();
        defs.iter()
            .map(|def| {
                let hash = schema_hash(&def.parameters);
                self.store.upsert_seen(
                    &def.name,
                    &def.description,
                    &hash,
                    &def.parameters,
                    role_id.map(|r| r.as_str().to_string()),
                    api_key_id.map(|s| s.to_string()),
                    now,
                )
            })
            .collect()
    }

    /// §4.4 `Resolve`: exact (role, tool) match first, else the
    /// most-restrictive permission among any tool sharing the same name.
    pub fn resolve(&self, role_id: &RoleId, tool_id: Uuid) -> Option<ToolPermission> {
        if let Some(exact) = self.store.get_permission(role_id, tool_id) {
            return Some(exact);
        }

        let name = self.store.get_tool(tool_id)?.name;
        let siblings = self.store.find_by_name(&name);
        let mut best: Option<ToolPermission> = None;
        for sibling in siblings {
            if sibling.id == tool_id {
                continue;
            }
            if let Some(perm) = self.store.get_permission(role_id, sibling.id) {
                best = Some(match best {
                    None => perm,
                    Some(b) => {
                        if perm.status.restrictiveness_rank() >= b.status.restrictiveness_rank() {
                            perm
                        } else {
                            b
                        }
                    }
                });
            }
        }
        best
    }

    pub fn approve_all(&self, role_id: &RoleId) -> usize {
        self.store.set_all_pending(role_id, PermissionStatus::Allowed)
    }

    pub fn deny_all(&self, role_id: &RoleId) -> usize {
        self.store.set_all_pending(role_id, PermissionStatus::Denied)
    }

    pub fn remove_all(&self, role_id: &RoleId) -> usize {
        self.store.set_all_pending(role_id, PermissionStatus::Removed)
    }

    pub fn store(&self) -> &Arc<dyn ToolStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(name: &str, params: serde_json::Value) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: format!("{name} tool"),
            parameters: params,
        }
    }

    #[test]
    fn discover_dedupes_identical_tools_and_bumps_seen_count() {
        let store = Arc::new(InMemoryToolStore::new());
        let svc = ToolDiscoveryService::new(store.clone());
        let role = RoleId::new("r1");

        let tools = vec![def("search_web", json!({"type": "object"}))];
        let first = svc.discover(&tools, Some(&role), None);
        let second = svc.discover(&tools, Some(&role), None);

        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].seen_count, 2);
    }

    #[test]
    fn name_fallback_resolves_most_restrictive_sibling() {
        let store = Arc::new(InMemoryToolStore::new());
        let svc = ToolDiscoveryService::new(store.clone());
        let role = RoleId::new("r1");

        let variant_a = def("search_web", json!({"type": "object", "v": 1}));
        let variant_b = def("search_web", json!({"type": "object", "v": 2}));
        let discovered = svc.discover(&[variant_a, variant_b], Some(&role), None);

        store.set_permission(ToolPermission {
            tool_id: discovered[0].id,
            role_id: role.clone(),
            status: PermissionStatus::Removed,
            decider_id: Some("admin".into()),
            decider_email: None,
            decided_at: Some(chrono::Utc::now()),
            reason: Some("deprecated".into()),
        });

        // Resolving the *other* variant (no exact permission row) should
        // still come back REMOVED via name fallback.
        let resolved = svc.resolve(&role, discovered[1].id);
        assert_eq!(resolved.unwrap().status, PermissionStatus::Removed);
    }

    #[test]
    fn resolve_with_no_permission_at_all_returns_none() {
        let store = Arc::new(InMemoryToolStore::new());
        let svc = ToolDiscoveryService::new(store.clone());
        let role = RoleId::new("r1");
        let discovered = svc.discover(&[def("math_eval", json!({}))], Some(&role), None);
        assert!(svc.resolve(&role, discovered[0].id).is_none());
    }

    #[test]
    fn bulk_approve_all_only_touches_pending() {
        let store = Arc::new(InMemoryToolStore::new());
        let svc = ToolDiscoveryService::new(store.clone());
        let role = RoleId::new("r1");
        let discovered = svc.discover(
            &[def("a", json!({})), def("b", json!({}))],
            Some(&role),
            None,
        );
        store.set_permission(ToolPermission {
            tool_id: discovered[0].id,
            role_id: role.clone(),
            status: PermissionStatus::Denied,
            decider_id: None,
            decider_email: None,
            decided_at: None,
            reason: None,
        });

        let changed = svc.approve_all(&role);
        assert_eq!(changed, 1);
        assert_eq!(
            svc.resolve(&role, discovered[1].id).unwrap().status,
            PermissionStatus::Allowed
        );
        assert_eq!(
            svc.resolve(&role, discovered[0].id).unwrap().status,
            PermissionStatus::Denied
        );
    }
}
