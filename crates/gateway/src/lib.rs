//! Format-translating gateway core.
//!
//! One pipeline serves both client dialects: decode, detect, validate,
//! thread conversation context, pick a reasoning effort, build the unified
//! upstream request, dispatch it under the resilience kernel, and translate
//! the reply (or event stream) back into the dialect the client spoke.

use std::{convert::Infallible, sync::Arc, time::Instant};

use axum::{
    Router,
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use futures::StreamExt;
use serde_json::Value;
use tokio::runtime::Handle;

pub mod conversation;
pub mod detect;
pub mod effort;
pub mod error;
pub mod messages;
pub mod monitor;
pub mod provider;
pub mod resilience;
pub mod scrub;
pub mod streaming;
pub mod tokens;
pub mod validate;

mod request;

pub use request::{CORRELATION_ID_HEADER, RequestContext};

use conversation::ConversationTracker;
use detect::Dialect;
use error::GatewayError;
use messages::{
    anthropic::{AnthropicChatResponse, AnthropicStreamEvent},
    openai::{ChatCompletionResponse, Model, ModelsResponse},
    unified::{ReasoningEffort, ReasoningParams, ResponsesRequest, ResponsesResponse},
};
use monitor::{Monitor, RequestMetric, SecurityEvent, SecurityEventKind};
use provider::{Provider, ResponseStream, azure::AzureProvider, bedrock::BedrockProvider};
use resilience::{Execution, ResilienceKernel, degrade};
use streaming::{anthropic::AnthropicStreamAdapter, openai::OpenAiStreamAdapter};

/// Upper bound on request bodies and on the serialized upstream request.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared gateway state: providers, resilience kernel, conversation
/// tracker and monitor. Built once at startup.
pub struct Gateway {
    azure: AzureProvider,
    bedrock: Option<BedrockProvider>,
    kernel: ResilienceKernel,
    tracker: Arc<ConversationTracker>,
    monitor: Arc<Monitor>,
    reasoning: config::ReasoningConfig,
}

impl Gateway {
    /// Build the gateway from configuration.
    pub async fn new(config: &config::Config) -> Self {
        let azure = AzureProvider::new(config.upstream.azure.clone(), config.resilience.stream_idle_timeout);

        let bedrock = match &config.upstream.bedrock {
            Some(bedrock_config) => {
                log::info!("secondary backend enabled: {}", bedrock_config.model);
                Some(BedrockProvider::new(bedrock_config.clone(), config.resilience.stream_idle_timeout).await)
            }
            None => None,
        };

        Self {
            azure,
            bedrock,
            kernel: ResilienceKernel::new(config.resilience.clone()),
            tracker: Arc::new(ConversationTracker::new(&config.conversations)),
            monitor: Arc::new(Monitor::new()),
            reasoning: config.reasoning.clone(),
        }
    }

    /// The process-wide monitor handle.
    pub fn monitor(&self) -> Arc<Monitor> {
        self.monitor.clone()
    }

    /// The resilience kernel, for breaker snapshots in health reports.
    pub fn kernel(&self) -> &ResilienceKernel {
        &self.kernel
    }

    /// The conversation tracker, for the periodic eviction sweep.
    pub fn tracker(&self) -> Arc<ConversationTracker> {
        self.tracker.clone()
    }
}

/// Routes for both dialect endpoints and model listing.
///
/// Both completion paths run the same detector-driven pipeline; the path a
/// request arrives on is not authoritative.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/v1/messages", post(completions))
        .route("/v1/chat/completions", post(completions))
        .route("/v1/models", get(list_models))
        .with_state(gateway)
}

async fn completions(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    gateway.handle(&headers, addr.ip().to_string(), &body).await
}

async fn list_models(State(gateway): State<Arc<Gateway>>) -> axum::Json<ModelsResponse> {
    let mut data = vec![Model {
        id: gateway.azure.model().to_string(),
        object: "model".to_string(),
        created: 0,
        owned_by: "azure-openai".to_string(),
    }];

    if let Some(bedrock) = &gateway.bedrock {
        data.push(Model {
            id: bedrock.model().to_string(),
            object: "model".to_string(),
            created: 0,
            owned_by: "aws-bedrock".to_string(),
        });
    }

    axum::Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

impl Gateway {
    async fn handle(&self, headers: &HeaderMap, client_ip: String, body: &[u8]) -> Response {
        let started = Instant::now();
        let context = RequestContext::extract(headers, client_ip);

        if body.len() > MAX_BODY_BYTES {
            let error = GatewayError::PayloadTooLarge;
            self.record_rejection(&context, Dialect::Claude, "", &error, started);
            return error_response(&error, Dialect::Claude);
        }

        let raw: Value = match serde_json::from_slice(body) {
            Ok(raw) => raw,
            Err(e) => {
                let error = GatewayError::Validation(format!("request body is not valid JSON: {e}"));
                self.record_rejection(&context, Dialect::Claude, "", &error, started);
                return error_response(&error, Dialect::Claude);
            }
        };

        let dialect = detect::detect(&raw);
        log::debug!(
            "handling {dialect} request, correlation_id={}",
            context.correlation_id
        );

        let (mut unified, client_model, stream_requested) = match self.decode(dialect, &raw) {
            Ok(decoded) => decoded,
            Err(error) => {
                self.audit_validation_failure(&context, &error);
                self.record_rejection(&context, dialect, "", &error, started);
                return error_response(&error, dialect);
            }
        };

        let conversation_id = ConversationTracker::derive_id(headers, &raw, &context.client_ip);
        let turn = self.tracker.begin_turn(&conversation_id).await;

        let chosen_effort = context
            .effort_override
            .unwrap_or_else(|| effort::analyze(unified.instructions.as_deref(), &unified.input, turn.hints, &self.reasoning));

        unified.reasoning = match chosen_effort {
            ReasoningEffort::None => None,
            effort => Some(ReasoningParams { effort }),
        };
        unified.previous_response_id = turn.previous_response_id;
        unified
            .metadata
            .insert("correlation_id".to_string(), context.correlation_id.clone());

        if unified.user.is_none() {
            unified.user = Some(context.user_tag());
        }

        match serde_json::to_vec(&unified) {
            Ok(serialized) if serialized.len() > MAX_BODY_BYTES => {
                let error = GatewayError::Transformation("unified request exceeds the size limit".to_string());
                self.tracker.record_failure(&conversation_id).await;
                self.record_rejection(&context, dialect, &client_model, &error, started);
                return error_response(&error, dialect);
            }
            Ok(_) => {}
            Err(e) => {
                let error = GatewayError::Transformation(format!("failed to serialize unified request: {e}"));
                self.tracker.record_failure(&conversation_id).await;
                self.record_rejection(&context, dialect, &client_model, &error, started);
                return error_response(&error, dialect);
            }
        }

        let turn_state = TurnState {
            context,
            dialect,
            conversation_id,
            client_model,
            effort: chosen_effort,
            started,
        };

        if stream_requested {
            self.handle_stream(unified, turn_state).await
        } else {
            self.handle_sync(unified, turn_state).await
        }
    }

    fn decode(&self, dialect: Dialect, raw: &Value) -> error::Result<(ResponsesRequest, String, bool)> {
        match dialect {
            Dialect::Claude => {
                let request = validate::validate_claude(raw)?;
                let model = request.model.clone();
                let stream = request.stream.unwrap_or(false);
                Ok((ResponsesRequest::from(request), model, stream))
            }
            Dialect::OpenAi => {
                let request = validate::validate_openai(raw)?;
                let model = request.model.clone();
                let stream = request.stream.unwrap_or(false);
                Ok((ResponsesRequest::from(request), model, stream))
            }
        }
    }

    async fn handle_sync(&self, unified: ResponsesRequest, turn: TurnState) -> Response {
        let execution = self.dispatch(&unified, &turn.context.correlation_id).await;
        let elapsed = turn.started.elapsed();
        let retry_count = execution.retries();
        let breaker_used = execution.breaker_rejected;

        match execution.result {
            Ok(mut response) => {
                let reasoning_tokens = response.usage.reasoning_tokens();
                let visible_output = streaming::visible_output_tokens(&response.usage, self.reasoning.tokens_in_output);

                self.tracker
                    .record_success(
                        &turn.conversation_id,
                        &response.id,
                        response.usage.input_tokens,
                        visible_output,
                        elapsed,
                        response.is_truncated(),
                    )
                    .await;

                self.monitor.record_request(RequestMetric {
                    correlation_id: turn.context.correlation_id.clone(),
                    dialect: turn.dialect,
                    model: turn.client_model.clone(),
                    effort: turn.effort,
                    input_tokens: response.usage.input_tokens,
                    output_tokens: visible_output,
                    reasoning_tokens,
                    response_time: elapsed,
                    success: true,
                    error_class: None,
                    retry_count,
                    breaker_used,
                    fallback_used: false,
                });

                response.model = turn.client_model;

                if self.reasoning.tokens_in_output {
                    // Folding deliberation into the visible count is done by
                    // clearing the breakdown the translators subtract.
                    response.usage.output_tokens_details.reasoning_tokens = 0;
                }

                let body = match turn.dialect {
                    Dialect::Claude => serde_json::to_value(AnthropicChatResponse::from(response)),
                    Dialect::OpenAi => serde_json::to_value(ChatCompletionResponse::from(response)),
                };

                match body {
                    Ok(body) => (StatusCode::OK, axum::Json(body)).into_response(),
                    Err(e) => {
                        log::error!("failed to encode response body: {e}");
                        let error = GatewayError::Transformation("failed to encode response".to_string());
                        error_response(&error, turn.dialect)
                    }
                }
            }
            Err(error) => {
                self.tracker.record_failure(&turn.conversation_id).await;

                if matches!(error, GatewayError::RateLimit { .. }) {
                    self.monitor.record_security(security_event(
                        SecurityEventKind::RateLimit,
                        &turn.context,
                        [("class".to_string(), error.class().to_string())].into(),
                    ));
                }

                let reply = degrade::render(&error, turn.dialect, &turn.client_model);

                self.monitor.record_request(RequestMetric {
                    correlation_id: turn.context.correlation_id.clone(),
                    dialect: turn.dialect,
                    model: turn.client_model.clone(),
                    effort: turn.effort,
                    input_tokens: 0,
                    output_tokens: 0,
                    reasoning_tokens: 0,
                    response_time: elapsed,
                    success: false,
                    error_class: Some(error.class()),
                    retry_count,
                    breaker_used,
                    fallback_used: reply.used_fallback_message,
                });

                log::warn!(
                    "request degraded: class={} correlation_id={}",
                    error.class(),
                    turn.context.correlation_id
                );

                degraded_response(reply)
            }
        }
    }

    async fn handle_stream(&self, unified: ResponsesRequest, turn: TurnState) -> Response {
        let execution = self.dispatch_stream(&unified, &turn.context.correlation_id).await;
        let retry_count = execution.retries();
        let breaker_used = execution.breaker_rejected;

        let upstream = match execution.result {
            Ok(upstream) => upstream,
            Err(error) => {
                self.tracker.record_failure(&turn.conversation_id).await;

                let reply = degrade::render(&error, turn.dialect, &turn.client_model);

                self.monitor.record_request(RequestMetric {
                    correlation_id: turn.context.correlation_id.clone(),
                    dialect: turn.dialect,
                    model: turn.client_model.clone(),
                    effort: turn.effort,
                    input_tokens: 0,
                    output_tokens: 0,
                    reasoning_tokens: 0,
                    response_time: turn.started.elapsed(),
                    success: false,
                    error_class: Some(error.class()),
                    retry_count,
                    breaker_used,
                    fallback_used: reply.used_fallback_message,
                });

                return degraded_response(reply);
            }
        };

        let bookkeeper = StreamBookkeeper {
            tracker: self.tracker.clone(),
            monitor: self.monitor.clone(),
            turn: turn.clone(),
            include_reasoning: self.reasoning.tokens_in_output,
            retry_count,
            finalized: false,
        };

        match turn.dialect {
            Dialect::Claude => claude_sse(upstream, turn, bookkeeper),
            Dialect::OpenAi => openai_sse(upstream, turn, bookkeeper),
        }
    }

    /// Dispatch to the primary backend, falling over to the secondary for
    /// upstream-class failures when one is configured.
    async fn dispatch(&self, request: &ResponsesRequest, correlation_id: &str) -> Execution<ResponsesResponse> {
        let primary = self
            .kernel
            .execute("respond", |_| self.azure.respond(request.clone(), correlation_id))
            .await;

        let Some(bedrock) = &self.bedrock else {
            return primary;
        };

        let failed_class = match &primary.result {
            Err(error) if is_upstream_class(error) => error.class(),
            _ => return primary,
        };

        log::warn!("primary backend failed ({failed_class}), trying secondary");

        let mut secondary = self
            .kernel
            .execute("respond_secondary", |_| bedrock.respond(request.clone(), correlation_id))
            .await;

        secondary.attempts += primary.attempts;
        secondary.breaker_rejected |= primary.breaker_rejected;
        secondary
    }

    async fn dispatch_stream(&self, request: &ResponsesRequest, correlation_id: &str) -> Execution<ResponseStream> {
        let primary = self
            .kernel
            .execute("respond_stream", |_| {
                self.azure.respond_stream(request.clone(), correlation_id)
            })
            .await;

        let Some(bedrock) = &self.bedrock else {
            return primary;
        };

        let failed_class = match &primary.result {
            Err(error) if is_upstream_class(error) => error.class(),
            _ => return primary,
        };

        log::warn!("primary backend failed ({failed_class}), trying secondary");

        let mut secondary = self
            .kernel
            .execute("respond_stream_secondary", |_| {
                bedrock.respond_stream(request.clone(), correlation_id)
            })
            .await;

        secondary.attempts += primary.attempts;
        secondary.breaker_rejected |= primary.breaker_rejected;
        secondary
    }

    fn audit_validation_failure(&self, context: &RequestContext, error: &GatewayError) {
        let kind = match error {
            GatewayError::Security(_) => SecurityEventKind::SuspiciousActivity,
            _ => SecurityEventKind::Validation,
        };

        self.monitor.record_security(security_event(
            kind,
            context,
            [("class".to_string(), error.class().to_string())].into(),
        ));
    }

    fn record_rejection(
        &self,
        context: &RequestContext,
        dialect: Dialect,
        model: &str,
        error: &GatewayError,
        started: Instant,
    ) {
        self.monitor.record_request(RequestMetric {
            correlation_id: context.correlation_id.clone(),
            dialect,
            model: model.to_string(),
            effort: ReasoningEffort::None,
            input_tokens: 0,
            output_tokens: 0,
            reasoning_tokens: 0,
            response_time: started.elapsed(),
            success: false,
            error_class: Some(error.class()),
            retry_count: 0,
            breaker_used: false,
            fallback_used: false,
        });
    }
}

#[derive(Clone)]
struct TurnState {
    context: RequestContext,
    dialect: Dialect,
    conversation_id: String,
    client_model: String,
    effort: ReasoningEffort,
    started: Instant,
}

fn is_upstream_class(error: &GatewayError) -> bool {
    matches!(
        error,
        GatewayError::UpstreamTimeout
            | GatewayError::UpstreamNetwork(_)
            | GatewayError::UpstreamServer { .. }
            | GatewayError::CircuitOpen
            | GatewayError::RateLimit { .. }
    )
}

fn error_response(error: &GatewayError, dialect: Dialect) -> Response {
    (error.status_code(), axum::Json(error.to_wire(dialect))).into_response()
}

fn degraded_response(reply: degrade::DegradedReply) -> Response {
    let mut response = (reply.status, axum::Json(reply.body)).into_response();

    if let Some(retry_after) = reply.retry_after
        && let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string())
    {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }

    response
}

fn security_event(
    kind: SecurityEventKind,
    context: &RequestContext,
    detail: std::collections::BTreeMap<String, String>,
) -> SecurityEvent {
    SecurityEvent {
        kind,
        client_ip_hash: context.ip_hash(),
        has_user_agent: context.user_agent_present,
        timestamp: std::time::SystemTime::now(),
        correlation_id: context.correlation_id.clone(),
        detail,
    }
}

/// Completes the conversation and audit records for a stream, whether it
/// ends normally, errors out, or the client disconnects mid-way.
struct StreamBookkeeper {
    tracker: Arc<ConversationTracker>,
    monitor: Arc<Monitor>,
    turn: TurnState,
    include_reasoning: bool,
    retry_count: u32,
    finalized: bool,
}

impl StreamBookkeeper {
    fn on_completed(&mut self, response: &ResponsesResponse) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let tracker = self.tracker.clone();
        let conversation_id = self.turn.conversation_id.clone();
        let response_id = response.id.clone();
        let input_tokens = response.usage.input_tokens;
        let visible_output = streaming::visible_output_tokens(&response.usage, self.include_reasoning);
        let truncated = response.is_truncated();
        let elapsed = self.turn.started.elapsed();

        self.monitor.record_request(RequestMetric {
            correlation_id: self.turn.context.correlation_id.clone(),
            dialect: self.turn.dialect,
            model: self.turn.client_model.clone(),
            effort: self.turn.effort,
            input_tokens,
            output_tokens: visible_output,
            reasoning_tokens: response.usage.reasoning_tokens(),
            response_time: elapsed,
            success: true,
            error_class: None,
            retry_count: self.retry_count,
            breaker_used: false,
            fallback_used: false,
        });

        tokio::spawn(async move {
            tracker
                .record_success(&conversation_id, &response_id, input_tokens, visible_output, elapsed, truncated)
                .await;
        });
    }

    fn on_failure(&mut self, class: &'static str) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        self.monitor.record_request(RequestMetric {
            correlation_id: self.turn.context.correlation_id.clone(),
            dialect: self.turn.dialect,
            model: self.turn.client_model.clone(),
            effort: self.turn.effort,
            input_tokens: 0,
            output_tokens: 0,
            reasoning_tokens: 0,
            response_time: self.turn.started.elapsed(),
            success: false,
            error_class: Some(class),
            retry_count: self.retry_count,
            breaker_used: false,
            fallback_used: false,
        });

        let tracker = self.tracker.clone();
        let conversation_id = self.turn.conversation_id.clone();

        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                tracker.record_failure(&conversation_id).await;
            });
        }
    }
}

impl Drop for StreamBookkeeper {
    fn drop(&mut self) {
        // A drop before finalization means the client went away mid-stream.
        self.on_failure("client_disconnect");
    }
}

fn sse_event<T: serde::Serialize>(payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            log::error!("failed to serialize stream event: {e}");
            Event::default().data("{}")
        }
    }
}

fn claude_sse(upstream: ResponseStream, turn: TurnState, bookkeeper: StreamBookkeeper) -> Response {
    let adapter = AnthropicStreamAdapter::new(
        format!("msg_{}", uuid::Uuid::new_v4().simple()),
        turn.client_model.clone(),
        bookkeeper.include_reasoning,
    );

    let events = futures::stream::unfold(
        (upstream, adapter, bookkeeper, false),
        |(mut upstream, mut adapter, mut bookkeeper, done)| async move {
            if done {
                return None;
            }

            loop {
                match upstream.next().await {
                    Some(Ok(event)) => {
                        if let messages::unified::ResponsesStreamEvent::Completed { response }
                        | messages::unified::ResponsesStreamEvent::Incomplete { response } = &event
                        {
                            bookkeeper.on_completed(response);
                        }

                        let out = adapter.on_event(event);
                        if !out.is_empty() {
                            return Some((out, (upstream, adapter, bookkeeper, false)));
                        }
                    }
                    Some(Err(error)) => {
                        bookkeeper.on_failure(error.class());

                        let mut out = vec![AnthropicStreamEvent::Error {
                            error: messages::anthropic::AnthropicErrorDetails {
                                error_type: error.wire_type().to_string(),
                                message: error.client_message(),
                            },
                        }];
                        out.extend(adapter.finish());

                        return Some((out, (upstream, adapter, bookkeeper, true)));
                    }
                    None => {
                        // The adapter renders a close without a completion
                        // marker as truncation.
                        let out = adapter.finish();
                        bookkeeper.on_failure("upstream_network");

                        return Some((out, (upstream, adapter, bookkeeper, true)));
                    }
                }
            }
        },
    )
    .flat_map(|events| futures::stream::iter(events.into_iter().map(|event| Ok::<_, Infallible>(sse_event(&event)))));

    Sse::new(events).into_response()
}

fn openai_sse(upstream: ResponseStream, turn: TurnState, bookkeeper: StreamBookkeeper) -> Response {
    let adapter = OpenAiStreamAdapter::new(
        format!("chatcmpl_{}", uuid::Uuid::new_v4().simple()),
        turn.client_model.clone(),
        bookkeeper.include_reasoning,
    );

    let chunks = futures::stream::unfold(
        (upstream, adapter, bookkeeper, false),
        |(mut upstream, mut adapter, mut bookkeeper, done)| async move {
            if done {
                return None;
            }

            loop {
                match upstream.next().await {
                    Some(Ok(event)) => {
                        if let messages::unified::ResponsesStreamEvent::Completed { response }
                        | messages::unified::ResponsesStreamEvent::Incomplete { response } = &event
                        {
                            bookkeeper.on_completed(response);
                        }

                        let out = adapter.on_event(event);
                        if !out.is_empty() {
                            return Some((out, (upstream, adapter, bookkeeper, false)));
                        }
                    }
                    Some(Err(error)) => {
                        bookkeeper.on_failure(error.class());

                        return Some((adapter.finish(), (upstream, adapter, bookkeeper, true)));
                    }
                    None => {
                        let out = adapter.finish();

                        if out.is_empty() {
                            // Normal completion already emitted the terminal
                            // chunk; nothing is owed but the sentinel.
                            return None;
                        }

                        bookkeeper.on_failure("upstream_network");

                        return Some((out, (upstream, adapter, bookkeeper, true)));
                    }
                }
            }
        },
    )
    .flat_map(|chunks| futures::stream::iter(chunks.into_iter().map(|chunk| Ok::<_, Infallible>(sse_event(&chunk)))));

    let with_done = chunks.chain(futures::stream::once(async {
        Ok::<_, Infallible>(Event::default().data("[DONE]"))
    }));

    Sse::new(with_done).into_response()
}
