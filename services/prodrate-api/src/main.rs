//! Production Rates API
//!
//! Single-binary REST backend that:
//! 1. Authenticates to Azure SQL with client-credential access tokens
//! 2. Serves the rate-of-operations and wrenchtime review endpoints
//! 3. Manages reviewer accounts in the USER_MANAGEMENT table
//! 4. Refreshes credentials in the background and retries recoverable SQL failures

mod auth;
mod config;
mod dataset;
mod error;
mod export;
mod filters;
mod metrics;
mod recipes;
mod users;
mod validate;
mod wrenchtime;

#[cfg(test)]
mod testutil;

use anyhow::{Context, Result};
use axum::extract::{OriginalUri, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use azsql_auth::{ClientCredentials, TokenProvider};
use azsql_pool::{ConnectionManager, spawn_refresh_task};
use common::Secret;
use metrics_exporter_prometheus::PrometheusHandle;
use mssql_driver::TdsConnector;

use crate::config::Config;
use crate::error::ApiError;

/// How long to wait for in-flight requests once a shutdown signal arrives.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub jwt_secret: Arc<Secret<String>>,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router: public health/metrics, JWT-protected dataset and
/// user routes, CORS for the web app origins, and a concurrency cap.
pub(crate) fn build_router(
    state: AppState,
    max_connections: usize,
    cors_origins: &[String],
) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let protected = Router::new()
        .nest("/rate-of-operations", recipes::router())
        .nest("/wrenchtime", wrenchtime::router())
        .nest("/users", users::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_jwt,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .fallback(not_found_handler)
        .layer(middleware::from_fn(track_requests))
        .layer(cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting production-rates-api");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        server = %config.database.server,
        database = %config.database.database,
        refresh_minutes = config.refresh.interval_minutes,
        "configuration loaded"
    );

    let client_secret = config
        .azure
        .client_secret
        .as_ref()
        .context("azure client secret missing after config load")?
        .expose()
        .to_string();
    let jwt_secret = Arc::new(Secret::new(
        config
            .auth
            .jwt_secret
            .as_ref()
            .context("jwt secret missing after config load")?
            .expose()
            .to_string(),
    ));

    let source = Arc::new(ClientCredentials::new(
        &config.azure.tenant_id,
        config.azure.client_id.clone(),
        client_secret,
    ));
    let provider = Arc::new(TokenProvider::new(source));
    let manager = Arc::new(ConnectionManager::new(
        provider,
        Arc::new(TdsConnector::new()),
        config.database.target(),
    ));

    // Warm the pool; startup continues even if the first connect fails.
    manager.initialize().await;

    let refresher = spawn_refresh_task(manager.clone(), config.refresh.interval());

    let app_state = AppState {
        manager: manager.clone(),
        jwt_secret,
        prometheus: prometheus_handle,
    };
    let app = build_router(
        app_state,
        config.server.max_connections,
        &config.server.cors_origins,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown with drain timeout enforcement:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT caps the drain so a slow client cannot block exit
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    refresher.abort();
    manager.shutdown().await;

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: pool and credential snapshot from the connection
/// manager. 200 only when both are good; degraded states get 503.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.manager.health().await;
    let status_code = if health.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(health))
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn not_found_handler(OriginalUri(uri): OriginalUri) -> Response {
    ApiError::not_found("The requested resource was not found")
        .at(&uri)
        .into_response()
}

/// Request-logging middleware: assigns a request id, times the request, and
/// feeds the Prometheus counters.
async fn track_requests(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    metrics::record_request(status, &method, elapsed);
    info!(
        %request_id,
        %method,
        %path,
        status,
        elapsed_ms = (elapsed * 1000.0) as u64,
        "request served"
    );
    response
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
