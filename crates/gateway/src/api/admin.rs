//! Operational routes: `GET /dispatcher/stats` (spec.md §6) and a
//! supplemented `GET /v1/admin/info` system-info endpoint, following the
//! teacher's `api/admin.rs` convention of small per-concern handler
//! modules. Both routes sit behind `auth::require_admin_token`.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use core_domain::auth::TenantId;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    tenant: Option<String>,
}

pub async fn dispatcher_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    let mut snapshot = state.dispatcher.stats();
    if let Some(tenant) = query.tenant {
        snapshot.tenant = Some(state.dispatcher.tenant_stats(&TenantId::new(tenant)));
    }
    Json(snapshot)
}

pub async fn system_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "server": {
            "host": state.config.server.host,
            "port": state.config.server.port,
        },
        "dispatcher": {
            "capacity": state.dispatcher.capacity(),
            "shutting_down": state.dispatcher.is_shutting_down(),
        },
    }))
}

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
