//! Azure OpenAI Responses API provider.

use std::time::Duration;

use async_trait::async_trait;
use config::AzureConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use url::Url;

use crate::{
    error::{GatewayError, Result},
    messages::unified::{ResponsesRequest, ResponsesResponse, ResponsesStreamEvent},
    provider::{Provider, ResponseStream, http_client::http_client},
};

/// Header propagating the request's correlation id upstream.
const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// Azure OpenAI provider speaking the Responses API.
pub struct AzureProvider {
    client: Client,
    url: Url,
    config: AzureConfig,
    idle_timeout: Duration,
}

impl AzureProvider {
    /// Build the provider from configuration.
    pub fn new(config: AzureConfig, idle_timeout: Duration) -> Self {
        let mut url = config.endpoint.clone();
        url.set_path("/openai/v1/responses");
        url.query_pairs_mut().append_pair("api-version", &config.api_version);

        Self {
            client: http_client(),
            url,
            config,
            idle_timeout,
        }
    }

    fn request_builder(&self, correlation_id: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url.clone())
            .header("api-key", self.config.api_key.expose_secret())
            .header(CORRELATION_HEADER, correlation_id)
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl Provider for AzureProvider {
    async fn respond(&self, mut request: ResponsesRequest, correlation_id: &str) -> Result<ResponsesResponse> {
        request.model = self.config.model.clone();
        request.stream = false;

        let response = self
            .request_builder(correlation_id)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = response_headers_retry_after(&response);
            let body = response.text().await.ok();
            return Err(classify_status(status, retry_after, body));
        }

        let body = response.text().await.map_err(classify_transport_error)?;

        serde_json::from_str(&body).map_err(|e| {
            log::error!("failed to decode upstream response: {e}");
            GatewayError::UpstreamServer {
                status: status.as_u16(),
                message: "upstream returned an undecodable response".to_string(),
            }
        })
    }

    async fn respond_stream(&self, mut request: ResponsesRequest, correlation_id: &str) -> Result<ResponseStream> {
        request.model = self.config.model.clone();
        request.stream = true;

        let response = self
            .request_builder(correlation_id)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = response_headers_retry_after(&response);
            let body = response.text().await.ok();
            return Err(classify_status(status, retry_after, body));
        }

        // Channel capacity of one: client backpressure pauses upstream
        // consumption instead of buffering ahead.
        let (tx, rx) = mpsc::channel::<Result<ResponsesStreamEvent>>(1);
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();

            loop {
                let next = tokio::time::timeout(idle_timeout, events.next()).await;

                let event = match next {
                    Ok(Some(Ok(event))) => event,
                    Ok(Some(Err(e))) => {
                        log::warn!("upstream stream error: {e}");
                        let _ = tx.send(Err(GatewayError::UpstreamNetwork(e.to_string()))).await;
                        return;
                    }
                    // Upstream closed the body; the translator decides
                    // whether a missing completed marker means truncation.
                    Ok(None) => return,
                    Err(_) => {
                        log::warn!("idle timeout waiting for upstream stream event");
                        let _ = tx.send(Err(GatewayError::UpstreamTimeout)).await;
                        return;
                    }
                };

                if event.data == "[DONE]" {
                    return;
                }

                let parsed: ResponsesStreamEvent = match serde_json::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::debug!("skipping undecodable upstream event: {e}");
                        continue;
                    }
                };

                if tx.send(Ok(parsed)).await.is_err() {
                    // Client went away; stop consuming the upstream body.
                    return;
                }
            }
        });

        Ok(Box::pin(EventReceiver { rx }))
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "azure"
    }
}

struct EventReceiver {
    rx: mpsc::Receiver<Result<ResponsesStreamEvent>>,
}

impl futures::Stream for EventReceiver {
    type Item = Result<ResponsesStreamEvent>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn classify_transport_error(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::UpstreamTimeout
    } else {
        GatewayError::UpstreamNetwork(error.to_string())
    }
}

fn response_headers_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: Option<String>) -> GatewayError {
    let message = body.unwrap_or_else(|| "upstream returned no error body".to_string());

    match status.as_u16() {
        429 => GatewayError::RateLimit { message, retry_after },
        408 => GatewayError::UpstreamTimeout,
        code => GatewayError::UpstreamServer { status: code, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_carry_the_retry_after_hint() {
        let error = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(7)),
            Some("slow down".to_string()),
        );

        let GatewayError::RateLimit { retry_after, .. } = error else {
            unreachable!("expected rate limit error");
        };
        assert_eq!(retry_after, Some(Duration::from_secs(7)));
    }

    #[test]
    fn server_errors_keep_the_upstream_status_and_body() {
        let error = classify_status(StatusCode::BAD_GATEWAY, None, Some("boom".to_string()));

        let GatewayError::UpstreamServer { status, message } = error else {
            unreachable!("expected upstream server error");
        };
        assert_eq!(status, 502);
        assert_eq!(message, "boom");
    }

    #[test]
    fn upstream_timeouts_classify_as_timeout() {
        let error = classify_status(StatusCode::REQUEST_TIMEOUT, None, None);
        assert!(matches!(error, GatewayError::UpstreamTimeout));
    }
}
