//! The axum HTTP admission layer (§6): the OpenAI-compatible chat route,
//! the dispatcher-stats/system-info operational routes, and the
//! middleware that gates each group.
//!
//! Grounded on `api/mod.rs`'s public/protected router split — generalized
//! here to three groups instead of two, since the chat route and the
//! operational routes are gated by different credentials (tenant api key
//! vs. a single admin token).

pub mod admin;
pub mod auth;
pub mod completions;
pub mod wire;

use axum::middleware;
use axum::routing::get;
use axum::routing::post;
use axum::Router;

use crate::state::AppState;

/// Build the full API router. `state` is needed up front to wire up the
/// auth middlewares at build time (mirrors the teacher's `router(state)`
/// signature).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/healthz", get(admin::healthz));

    let chat = Router::new()
        .route("/v1/chat/completions", post(completions::chat_completions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    let operational = Router::new()
        .route("/dispatcher/stats", get(admin::dispatcher_stats))
        .route("/v1/admin/info", get(admin::system_info))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_admin_token,
        ));

    public
        .merge(chat)
        .merge(operational)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
