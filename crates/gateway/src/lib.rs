//! The gateway crate: the `GatewayService` (the dispatcher's
//! `RequestProcessor`), the semantic cache and stream multiplexer it
//! depends on, and — in [`api`] — the axum HTTP admission layer that sits
//! in front of the dispatcher.

pub mod api;
pub mod cache;
pub mod router_port;
pub mod service;
pub mod state;
pub mod stream;

pub use service::GatewayService;
pub use state::AppState;
