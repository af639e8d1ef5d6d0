//! The seam between this crate and the gateway service: the dispatcher
//! owns admission, queueing, and concurrency, but has no idea how to
//! actually answer a chat request. A `RequestProcessor` is supplied by the
//! caller and does the cache/route/provider-call/cost work per request.

use async_trait::async_trait;

use core_domain::dispatch::DispatchResult;
use core_domain::envelope::RequestEnvelope;

use crate::cancel::CancelToken;

#[async_trait]
pub trait RequestProcessor: Send + Sync {
    async fn process(&self, envelope: RequestEnvelope, cancel: CancelToken) -> DispatchResult;
}
