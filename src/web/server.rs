use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::AppState;

use super::handlers;

/// Run the axum web server on the configured bind address.
pub async fn run(state: Arc<AppState>) {
    let app = Router::new()
        // API routes
        .route("/api/subway-arrivals", get(handlers::subway_arrivals))
        .route("/api/bus-arrivals", get(handlers::bus_arrivals))
        .route("/api/rail-arrivals", get(handlers::rail_arrivals))
        // Probes
        .route("/healthz", get(handlers::healthz))
        .route("/", get(handlers::index))
        // Middleware: bound the whole request, upstream fetches included
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        // Shared state
        .with_state(state.clone());

    let bind_addr = state.config.server.bind_addr.clone();
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => {
            info!("[WEB] Server listening on http://{}", bind_addr);
            l
        }
        Err(e) => {
            tracing::error!("[WEB] Failed to bind {}: {}", bind_addr, e);
            return;
        }
    };

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .ok();

    info!("[WEB] Server stopped");
}
