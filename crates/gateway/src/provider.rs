//! Upstream backend providers.

pub mod azure;
pub mod bedrock;
mod http_client;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{
    error::Result,
    messages::unified::{ResponsesRequest, ResponsesResponse, ResponsesStreamEvent},
};

/// A lazy, non-restartable sequence of upstream stream events.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponsesStreamEvent>> + Send>>;

/// A backend able to serve unified requests.
///
/// Given a unified request and the request's correlation id, a provider
/// produces either a complete response or a lazy event stream. Providers
/// surface upstream error envelopes verbatim; classification and retries
/// happen in the resilience kernel wrapping every call.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Serve a complete response.
    async fn respond(&self, request: ResponsesRequest, correlation_id: &str) -> Result<ResponsesResponse>;

    /// Serve a lazy stream of response events.
    async fn respond_stream(&self, request: ResponsesRequest, correlation_id: &str) -> Result<ResponseStream>;

    /// The upstream model or deployment requests are routed to.
    fn model(&self) -> &str;

    /// Provider name for logs and metrics.
    fn name(&self) -> &str;
}
