use crate::policy::Violation;

/// Shared error type used across the gateway crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    // ── Admission / dispatch path (§7) ──────────────────────────────
    #[error("queue full")]
    QueueFull,

    #[error("queue timeout")]
    QueueTimeout,

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("tenant concurrency limit reached")]
    TenantLimited,

    #[error("policy violation: {0}")]
    Policy(#[from] Violation),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("request cancelled")]
    ContextCancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable wire error code used in the OpenAI-compatible error envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Http(_) => "invalid_request",
            Error::Timeout(_) => "timeout",
            Error::Provider { .. } | Error::Upstream(_) => "server_error",
            Error::Config(_) => "server_error",
            Error::Auth(_) => "unauthorized",
            Error::QueueFull => "overloaded",
            Error::QueueTimeout => "queue_timeout",
            Error::ShuttingDown => "shutting_down",
            Error::TenantLimited => "rate_limit_exceeded",
            Error::Policy(v) => v.code(),
            Error::ContextCancelled => "invalid_request",
            Error::Internal(_) | Error::Other(_) => "server_error",
        }
    }

    /// HTTP status code this error should be surfaced as.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Http(_) | Error::ContextCancelled => 400,
            Error::Auth(_) => 401,
            Error::TenantLimited => 429,
            Error::Policy(v) => v.status_code(),
            Error::QueueFull | Error::QueueTimeout | Error::ShuttingDown | Error::Config(_) => 503,
            Error::Timeout(_) | Error::Provider { .. } | Error::Upstream(_) => 502,
            Error::Internal(_) | Error::Other(_) => 500,
        }
    }

    /// `Retry-After` header value for backpressure responses, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Error::QueueFull => Some(5),
            Error::QueueTimeout => Some(10),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
