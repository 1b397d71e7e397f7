//! AWS Bedrock provider using the unified Converse API.

mod input;
mod output;

use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_bedrockruntime::{
    Client as BedrockRuntimeClient,
    error::ProvideErrorMetadata,
    types::{ContentBlockDelta, ContentBlockStart, ConverseStreamOutput, StopReason},
};
use aws_smithy_runtime_api::client::result::SdkError;
use config::BedrockConfig;
use secrecy::ExposeSecret;
use tokio::sync::mpsc;

use crate::{
    error::{GatewayError, Result},
    messages::unified::{
        IncompleteDetails, OutputItem, ResponseStatus, ResponsesRequest, ResponsesResponse, ResponsesStreamEvent,
        ResponsesUsage,
    },
    provider::{Provider, ResponseStream},
};

/// AWS Bedrock provider for the secondary backend.
pub struct BedrockProvider {
    client: BedrockRuntimeClient,
    model: String,
    idle_timeout: Duration,
}

impl BedrockProvider {
    /// Build the provider, loading AWS configuration from the environment
    /// or from explicit credentials.
    pub async fn new(config: BedrockConfig, idle_timeout: Duration) -> Self {
        let region = Region::new(config.region.clone());
        let mut loader = aws_config::from_env().region(region);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.expose_secret(),
                secret_key.expose_secret(),
                None,
                None,
                "bedrock_provider",
            ));
        }

        let sdk_config = loader.load().await;

        Self {
            client: BedrockRuntimeClient::new(&sdk_config),
            model: config.model,
            idle_timeout,
        }
    }
}

#[async_trait]
impl Provider for BedrockProvider {
    async fn respond(&self, request: ResponsesRequest, _correlation_id: &str) -> Result<ResponsesResponse> {
        let payload = input::build_payload(request)?;

        let output = self
            .client
            .converse()
            .model_id(&self.model)
            .set_messages(Some(payload.messages))
            .set_system(payload.system)
            .set_inference_config(payload.inference_config)
            .set_tool_config(payload.tool_config)
            .send()
            .await
            .map_err(handle_sdk_error)?;

        Ok(output::to_unified(output, &self.model))
    }

    async fn respond_stream(&self, request: ResponsesRequest, _correlation_id: &str) -> Result<ResponseStream> {
        let payload = input::build_payload(request)?;

        let stream_output = self
            .client
            .converse_stream()
            .model_id(&self.model)
            .set_messages(Some(payload.messages))
            .set_system(payload.system)
            .set_inference_config(payload.inference_config)
            .set_tool_config(payload.tool_config)
            .send()
            .await
            .map_err(handle_sdk_error)?;

        let (tx, rx) = mpsc::channel::<Result<ResponsesStreamEvent>>(1);
        let model = self.model.clone();
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            let mut receiver = stream_output.stream;
            let mut usage = ResponsesUsage::default();
            let mut truncated = false;
            let mut open_tool: Option<(String, String, String)> = None;

            loop {
                let event = match tokio::time::timeout(idle_timeout, receiver.recv()).await {
                    Ok(Ok(Some(event))) => event,
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        log::error!("backend stream error: {e:?}");
                        let _ = tx
                            .send(Err(GatewayError::UpstreamNetwork(format!("stream error: {e:?}"))))
                            .await;
                        return;
                    }
                    Err(_) => {
                        log::warn!("idle timeout waiting for backend stream event");
                        let _ = tx.send(Err(GatewayError::UpstreamTimeout)).await;
                        return;
                    }
                };

                match event {
                    ConverseStreamOutput::ContentBlockDelta(delta_event) => match delta_event.delta {
                        Some(ContentBlockDelta::Text(text)) => {
                            if tx.send(Ok(ResponsesStreamEvent::OutputTextDelta { delta: text })).await.is_err() {
                                return;
                            }
                        }
                        Some(ContentBlockDelta::ToolUse(tool_delta)) => {
                            if let Some((_, _, arguments)) = open_tool.as_mut() {
                                arguments.push_str(&tool_delta.input);
                            }
                        }
                        _ => {}
                    },
                    ConverseStreamOutput::ContentBlockStart(start_event) => {
                        if let Some(ContentBlockStart::ToolUse(start)) = start_event.start {
                            open_tool = Some((start.tool_use_id, start.name, String::new()));
                        }
                    }
                    ConverseStreamOutput::ContentBlockStop(_) => {
                        if let Some((call_id, name, arguments)) = open_tool.take() {
                            let item = OutputItem::FunctionCall {
                                id: None,
                                call_id,
                                name,
                                arguments: if arguments.is_empty() { "{}".to_string() } else { arguments },
                            };

                            if tx.send(Ok(ResponsesStreamEvent::OutputItemDone { item })).await.is_err() {
                                return;
                            }
                        }
                    }
                    ConverseStreamOutput::MessageStop(stop_event) => {
                        truncated = matches!(stop_event.stop_reason, StopReason::MaxTokens);
                    }
                    ConverseStreamOutput::Metadata(metadata) => {
                        if let Some(token_usage) = metadata.usage {
                            usage = ResponsesUsage {
                                input_tokens: token_usage.input_tokens.max(0) as u64,
                                output_tokens: token_usage.output_tokens.max(0) as u64,
                                output_tokens_details: Default::default(),
                                total_tokens: token_usage.total_tokens.max(0) as u64,
                            };
                        }
                    }
                    _ => {}
                }
            }

            // Synthesize the terminal envelope the translators key off.
            let response = ResponsesResponse {
                id: format!("resp_bedrock_{}", uuid::Uuid::new_v4().simple()),
                model,
                status: if truncated {
                    ResponseStatus::Incomplete
                } else {
                    ResponseStatus::Completed
                },
                output: Vec::new(),
                usage,
                incomplete_details: truncated.then(|| IncompleteDetails {
                    reason: "max_output_tokens".to_string(),
                }),
            };

            let event = if truncated {
                ResponsesStreamEvent::Incomplete { response }
            } else {
                ResponsesStreamEvent::Completed { response }
            };

            let _ = tx.send(Ok(event)).await;
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "bedrock"
    }
}

fn handle_sdk_error<E, R>(error: SdkError<E, R>) -> GatewayError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::ServiceError(service_error) => {
            let err = service_error.err();
            let message = err.message().unwrap_or("unknown backend error").to_string();

            match err.code() {
                Some("ThrottlingException") => GatewayError::RateLimit {
                    message,
                    retry_after: None,
                },
                Some("ModelTimeoutException") => GatewayError::UpstreamTimeout,
                Some("ServiceUnavailableException") => GatewayError::UpstreamServer { status: 503, message },
                Some("InternalServerException") => GatewayError::UpstreamServer { status: 500, message },
                Some("ValidationException") => GatewayError::Transformation(message),
                _ => GatewayError::UpstreamServer { status: 502, message },
            }
        }
        SdkError::TimeoutError(_) => GatewayError::UpstreamTimeout,
        _ => GatewayError::UpstreamNetwork(format!("{error:?}")),
    }
}
