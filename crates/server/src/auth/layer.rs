//! Tower middleware enforcing client authentication.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::SystemTime,
};

use axum::{body::Body, extract::ConnectInfo};
use gateway::monitor::{Monitor, SecurityEvent, SecurityEventKind};
use http::{Request, Response, StatusCode, header};
use sha2::{Digest, Sha256};
use tower::Layer;

use super::CredentialStore;

/// Header carrying the API key outside of `Authorization`.
const API_KEY_HEADER: &str = "x-api-key";

/// Middleware layer validating the client credential on every request.
pub struct AuthLayer(Arc<AuthInner>);

struct AuthInner {
    store: CredentialStore,
    monitor: Arc<Monitor>,
}

impl AuthLayer {
    /// Build the layer around a credential store.
    pub fn new(store: CredentialStore, monitor: Arc<Monitor>) -> Self {
        Self(Arc::new(AuthInner { store, monitor }))
    }
}

impl Clone for AuthLayer {
    fn clone(&self) -> Self {
        AuthLayer(self.0.clone())
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, next: S) -> Self::Service {
        AuthService {
            next,
            inner: self.0.clone(),
        }
    }
}

/// Service produced by [`AuthLayer`].
pub struct AuthService<S> {
    next: S,
    inner: Arc<AuthInner>,
}

impl<S: Clone> Clone for AuthService<S> {
    fn clone(&self) -> Self {
        AuthService {
            next: self.next.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<S, ReqBody> tower::Service<Request<ReqBody>> for AuthService<S>
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

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let inner = self.inner.clone();
        let mut next = self.next.clone();

        let presented = extract_key(&request);

        Box::pin(async move {
            match presented {
                Some(key) if inner.store.validate(&key) => next.call(request).await,
                presented => {
                    let detail = if presented.is_some() {
                        "invalid credential"
                    } else {
                        "missing credential"
                    };

                    inner.monitor.record_security(SecurityEvent {
                        kind: SecurityEventKind::Authentication,
                        client_ip_hash: client_ip_hash(&request),
                        has_user_agent: request.headers().contains_key(header::USER_AGENT),
                        timestamp: SystemTime::now(),
                        correlation_id: correlation_id(&request),
                        detail: [("reason".to_string(), detail.to_string())].into(),
                    });

                    Ok(unauthorized(detail))
                }
            }
        })
    }
}

fn extract_key<B>(request: &Request<B>) -> Option<String> {
    if let Some(value) = request.headers().get(header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return Some(token.trim().to_string());
    }

    request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

fn correlation_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(gateway::CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn client_ip_hash<B>(request: &Request<B>) -> String {
    let ip = request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default();

    let digest = Sha256::digest(ip.as_bytes());

    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }

    out
}

fn unauthorized(detail: &str) -> Response<Body> {
    let body = serde_json::json!({
        "type": "error",
        "error": {
            "type": "authentication_error",
            "message": format!("Authentication failed: {detail}"),
        }
    });

    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
