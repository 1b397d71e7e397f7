//! Switchboard server library.
//!
//! Assembles the HTTP surface around the gateway core: correlation ids,
//! authentication, security headers, health and metrics endpoints, the
//! periodic monitor reporter and conversation sweep, and graceful
//! shutdown. Reusable by the binary and by integration tests.

#![deny(missing_docs)]

mod auth;
mod correlation;
mod health;
mod logger;
mod metrics;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::anyhow;
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use config::{Config, Environment};
use gateway::Gateway;
use http::{HeaderValue, header};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;

pub use auth::{AuthLayer, CredentialStore};
pub use correlation::CorrelationLayer;

/// Slack above the body limit so the pipeline, not the extractor, renders
/// the oversize rejection for bodies just past the line.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Shared state for the health and metrics endpoints.
pub struct AppState {
    /// The gateway core.
    pub gateway: Arc<Gateway>,
    /// Deployment environment, reported by the health endpoint.
    pub environment: Environment,
}

/// How a serve call failed, deciding the process exit code.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Initialization failed: bad configuration, placeholder credentials,
    /// unusable listen address. Exit code 1.
    #[error("initialization failed: {0}")]
    Init(#[source] anyhow::Error),

    /// The running server hit an unrecoverable fault. Exit code 2.
    #[error("runtime failure: {0}")]
    Runtime(#[source] anyhow::Error),
}

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,
    /// The loaded configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string, e.g. `info` or `server=debug,gateway=debug`.
    pub log_filter: String,
    /// Version string logged at startup.
    pub version: String,
    /// Optional channel receiving the bound address (useful with port 0).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Start and run the server until shutdown.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> Result<(), ServeError> {
    logger::init(&log_filter);

    log::info!("Switchboard {version}");

    let store = CredentialStore::new(&config.server.client_keys).map_err(ServeError::Init)?;
    let gateway = Arc::new(Gateway::new(&config).await);
    let monitor = gateway.monitor();

    spawn_reporter(gateway.clone(), config.monitor.report_interval, shutdown_signal.clone());
    spawn_sweeper(gateway.clone(), shutdown_signal.clone());

    let state = Arc::new(AppState {
        gateway: gateway.clone(),
        environment: config.server.environment,
    });

    let api = gateway::router(gateway.clone()).layer(
        tower::ServiceBuilder::new()
            .layer(CorrelationLayer)
            .layer(AuthLayer::new(store, monitor.clone()))
            .layer(DefaultBodyLimit::max(gateway::MAX_BODY_BYTES + BODY_LIMIT_SLACK)),
    );

    let ops = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .with_state(state);

    let app = api.merge(ops).layer(
        tower::ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("DENY"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static("max-age=31536000; includeSubDomains"),
            )),
    );

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| ServeError::Init(anyhow!("failed to bind to {listen_address}: {e}")))?;

    if let Some(sender) = bound_addr_sender {
        let bound = listener
            .local_addr()
            .map_err(|e| ServeError::Init(anyhow!("failed to read bound address: {e}")))?;

        if sender.send(bound).is_err() {
            log::debug!("bound address receiver dropped");
        }
    }

    log::info!("Messages endpoint: http://{listen_address}/v1/messages");
    log::info!("Chat completions endpoint: http://{listen_address}/v1/chat/completions");
    log::info!("Health endpoint: http://{listen_address}/health");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => {
            result.map_err(|e| ServeError::Runtime(anyhow!("server failed: {e}")))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("received shutdown signal, shutting down gracefully");
        }
    }

    // Final metric flush before the process exits.
    monitor.report(gateway.kernel().total_trips());

    Ok(())
}

fn spawn_reporter(gateway: Arc<Gateway>, interval: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    gateway.monitor().report(gateway.kernel().total_trips());
                }
            }
        }
    });
}

fn spawn_sweeper(gateway: Arc<Gateway>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    gateway.tracker().sweep();
                }
            }
        }
    });
}
