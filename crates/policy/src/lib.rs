//! Policy enforcement pipeline: the stateless gate a request passes
//! through before it is ever handed to the dispatcher.
//!
//! Evaluates a role/group's aggregate policy over one request and
//! produces either an allow (possibly with tools stripped) or a typed
//! [`Violation`].

pub mod enforcer;
pub mod rate_limit;

pub use enforcer::{PolicyEnforcer, PolicyOutcome, PolicyRequest};
pub use rate_limit::RateLimiter;
