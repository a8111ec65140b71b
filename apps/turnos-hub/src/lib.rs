//! Turnos relay hub: keeps the last encounter snapshot any client sent and
//! fans every new one out to all other connected clients.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod cli;
pub mod client;
pub mod config;
pub mod handlers;
pub mod registry;
pub mod telemetry;
pub mod websocket;

pub use config::HubConfig;
pub use registry::PeerRegistry;

/// Shared context handed to every route.
#[derive(Clone)]
pub struct HubState {
    pub config: Arc<HubConfig>,
    pub registry: PeerRegistry,
    pub metrics: Option<PrometheusHandle>,
}

impl HubState {
    pub fn new(config: HubConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            config: Arc::new(config),
            registry: PeerRegistry::new(),
            metrics,
        }
    }
}

pub fn build_router(state: HubState) -> Router {
    Router::new()
        .route("/", get(websocket::ws_handler))
        .route("/ws", get(websocket::ws_handler))
        .route("/health", get(handlers::health))
        .route("/state", get(handlers::last_state))
        .route("/metrics", get(handlers::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the hub on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: HubState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweeper = state
        .registry
        .spawn_sweeper(state.config.sweep_interval, state.config.idle_timeout);
    let addr = listener.local_addr().context("listener has no local address")?;
    info!(%addr, "turnos hub listening");

    let result = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error");

    sweeper.abort();
    info!("turnos hub stopped");
    result
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn run(config: HubConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    serve(listener, HubState::new(config, metrics), shutdown_signal()).await
}

pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
