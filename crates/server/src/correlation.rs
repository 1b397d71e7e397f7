//! Correlation-id middleware.
//!
//! Runs first: every request gets an id (the client's, if it sent one),
//! visible to all downstream components via the request headers and echoed
//! back on the response.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use axum::body::Body;
use http::{HeaderValue, Request, Response};
use tower::Layer;

/// Middleware layer assigning and echoing correlation ids.
#[derive(Clone, Default)]
pub struct CorrelationLayer;

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, next: S) -> Self::Service {
        CorrelationService { next }
    }
}

/// Service produced by [`CorrelationLayer`].
#[derive(Clone)]
pub struct CorrelationService<S> {
    next: S,
}

impl<S, ReqBody> tower::Service<Request<ReqBody>> for CorrelationService<S>
where
    S: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    S::Future: Send,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let correlation_id = request
            .headers()
            .get(gateway::CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty() && id.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            request.headers_mut().insert(gateway::CORRELATION_ID_HEADER, value);
        }

        let mut next = self.next.clone();

        Box::pin(async move {
            let mut response = next.call(request).await?;

            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                response.headers_mut().insert(gateway::CORRELATION_ID_HEADER, value);
            }

            Ok(response)
        })
    }
}
