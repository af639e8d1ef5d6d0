//! Shared application state passed to every HTTP handler and into the
//! `GatewayService` dispatch processor.

use std::sync::Arc;

use core_domain::config::Config;
use core_dispatch::{Dispatcher, TenantSemaphoreTable};
use core_policy::PolicyEnforcer;
use core_store::{ApiKeyRepository, GroupRepository, RoleRepository, UsageRepository};
use core_store::ToolExecutionLogRepository;

use crate::cache::SemanticCache;

/// Everything a handler needs, grouped the way the teacher groups
/// `AppState`: core services first, then the admission/security layer.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ──────────────────────────────────────────────
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub tenants: Arc<TenantSemaphoreTable>,

    // ── Policy & identity ───────────────────────────────────────────
    pub policy: Arc<PolicyEnforcer>,
    pub api_keys: Arc<dyn ApiKeyRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub usage: Arc<dyn UsageRepository>,
    pub tool_log: Arc<dyn ToolExecutionLogRepository>,

    // ── Caching ─────────────────────────────────────────────────────
    pub cache: Arc<dyn SemanticCache>,

    /// SHA-256 digest of the admin bearer token read from
    /// `config.admin.token_env` at startup. `None` disables admin routes
    /// entirely (they answer 403) rather than falling open.
    pub admin_token_hash: Option<Arc<[u8]>>,
}
