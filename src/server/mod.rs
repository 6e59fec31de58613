//! HTTP exposition: metrics, health and index endpoints

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use serde_json::json;
use tracing::{error, info};

use crate::metrics::MetricsRegistry;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    metrics: MetricsRegistry,
    version: &'static str,
}

impl AppState {
    #[must_use]
    pub fn new(metrics: MetricsRegistry, version: &'static str) -> Self {
        Self { metrics, version }
    }
}

/// Build the exporter's router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/", get(index_handler))
        .with_state(Arc::new(state))
}

/// Bind and serve until the shutdown future resolves.
pub async fn serve(
    addr: std::net::SocketAddr,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode metrics",
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
    }))
}

async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Html(format!(
        "<html>\
         <head><title>NTP Exporter</title></head>\
         <body>\
         <h1>NTP Exporter {}</h1>\
         <p><a href=\"/metrics\">Metrics</a></p>\
         <p><a href=\"/health\">Health</a></p>\
         </body>\
         </html>",
        state.version
    ))
}
