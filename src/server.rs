//! # Probe Server
//!
//! Serves `/metrics` (Prometheus text format), `/healthz` (always 200) and
//! `/readyz` (200 while the operator accepts work, 503 once shutdown starts)
//! on `METRICS_PORT`.

use crate::observability::metrics::REGISTRY;
use anyhow::Context as _;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Readiness flag shared by the probe server and the watch loop
#[derive(Debug, Default)]
pub struct ServerState {
    ready: AtomicBool,
}

impl ServerState {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Bind `port` and serve until the process exits
///
/// The operator is marked ready as soon as the listener is bound.
pub async fn start_server(port: u16, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding probe server to port {port}"))?;
    info!(port, "Probe server listening");
    state.set_ready(true);

    axum::serve(listener, router(state))
        .await
        .context("probe server stopped")
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    match encoder.encode(&REGISTRY.gather(), &mut body) {
        Ok(()) => ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response(),
        Err(e) => {
            error!(error = %e, "Metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn readyz(State(state): State<Arc<ServerState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
