//! Request admission and dispatch: the priority queues, the tenant
//! semaphore table, the worker pool, and the autoscaler that sit between
//! the HTTP admission layer and the gateway service.

pub mod autoscaler;
pub mod cancel;
pub mod dispatcher;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod semaphore;
pub mod worker;

pub use cancel::CancelToken;
pub use dispatcher::{Admitted, Dispatcher};
pub use metrics::DispatcherMetrics;
pub use processor::RequestProcessor;
pub use queue::{PendingRequest, PriorityQueues, QueueDepths};
pub use semaphore::{DefaultTierResolver, TenantSemaphoreTable, TenantTierResolver};
