//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ControllerState;
use crate::{Error, Result};

use super::handlers;

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
async fn metrics_handler() -> std::result::Result<String, axum::http::StatusCode> {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

pub fn router(state: Arc<ControllerState>) -> Router {
    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/kataconfigs", get(handlers::list_kata_configs))
        .route("/api/v1/kataconfigs/{name}", get(handlers::get_kata_config));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the REST API server
pub async fn run_server(state: Arc<ControllerState>, addr: SocketAddr) -> Result<()> {
    let app = router(state);

    info!("REST API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
