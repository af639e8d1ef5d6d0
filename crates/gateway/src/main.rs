use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use core_domain::config::{Config, ConfigSeverity};
use core_dispatch::{DefaultTierResolver, Dispatcher, TenantSemaphoreTable};
use core_gateway::{api, GatewayService};
use core_gateway::cache::InMemorySemanticCache;
use core_gateway::router_port::TierRouter;
use core_gateway::state::AppState;
use core_policy::PolicyEnforcer;
use core_providers::router::LlmRouter;
use core_store::memory::{
    InMemoryGroupRepository, InMemoryKeyRepository, InMemoryRoleRepository, InMemoryUsageRepository,
};
use core_store::tool_log::InMemoryToolExecutionLogRepository;
use core_tool_discovery::{InMemoryToolStore, ToolDiscoveryService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let (config, config_path) = load_config()?;
    run_server(Arc::new(config), config_path).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,core_gateway=debug")),
        )
        .json()
        .init();
}

fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("MODELGATE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

async fn run_server(config: Arc<Config>, config_path: String) -> anyhow::Result<()> {
    tracing::info!(config_path, "modelgate starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Stores (in-memory; swap for a relational backend without
    // touching any caller — every collaborator only sees the trait) ──
    let api_keys = Arc::new(InMemoryKeyRepository::new());
    let roles = Arc::new(InMemoryRoleRepository::new());
    let groups = Arc::new(InMemoryGroupRepository::new());
    let usage = Arc::new(InMemoryUsageRepository::new(10_000));
    let tool_log = Arc::new(InMemoryToolExecutionLogRepository::new(10_000));

    // ── Tool discovery & policy ───────────────────────────────────────
    let tool_store = Arc::new(InMemoryToolStore::new());
    let tool_discovery = Arc::new(ToolDiscoveryService::new(tool_store));
    let policy = Arc::new(PolicyEnforcer::new(
        roles.clone(),
        groups.clone(),
        tool_discovery,
        tool_log.clone(),
    ));

    // ── LLM routing ────────────────────────────────────────────────────
    let router = Arc::new(LlmRouter::from_config(&config.llm).context("constructing LLM router")?);
    let intelligent_router =
        Arc::new(TierRouter::new(config.llm.router.clone().unwrap_or_default()));

    // ── Cache ────────────────────────────────────────────────────────
    let cache = Arc::new(InMemorySemanticCache::new());

    // ── Gateway service (the dispatcher's `RequestProcessor`) ─────────
    let gateway_service = Arc::new(GatewayService::new(
        config.clone(),
        router,
        intelligent_router,
        policy.clone(),
        roles.clone(),
        usage.clone(),
        tool_log.clone(),
        cache.clone(),
    ));

    // ── Dispatcher ───────────────────────────────────────────────────
    let tenants = Arc::new(TenantSemaphoreTable::new(Arc::new(
        DefaultTierResolver::default(),
    )));
    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatcher.clone(),
        gateway_service,
        tenants.clone(),
    ));
    dispatcher.start();

    // ── Admin token (hashed once at startup, constant-time compared
    // per request — mirrors the teacher's api-token pattern) ─────────
    let admin_token_hash = std::env::var(&config.admin.token_env)
        .ok()
        .filter(|t| !t.is_empty())
        .map(|t| -> Arc<[u8]> { Sha256::digest(t.as_bytes()).to_vec().into() });
    if admin_token_hash.is_none() {
        tracing::warn!(
            env_var = %config.admin.token_env,
            "admin token not set — /dispatcher/stats and /v1/admin/info are disabled"
        );
    }

    let state = AppState {
        config: config.clone(),
        dispatcher: dispatcher.clone(),
        tenants,
        policy,
        api_keys,
        roles,
        groups,
        usage,
        tool_log,
        cache,
        admin_token_hash,
    };

    // ── CORS layer ─────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection ahead of the
    // dispatcher's own admission control) ───────────────────────────
    let max_concurrent = std::env::var("MODELGATE_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Rate-limit layer (per-IP token bucket via governor) ─────────
    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );

        GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    let router = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state)
    } else {
        router.with_state(state)
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "modelgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    dispatcher.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

/// Build a [`CorsLayer`] from the configured allowed origins. Origins may
/// carry a trailing `:*` wildcard for the port segment; a literal `"*"`
/// allows all origins.
fn build_cors_layer(cors: &core_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
