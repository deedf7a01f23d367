use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use common::gather_metrics;
use prometheus::Registry;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::info;

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    match gather_metrics(&registry) {
        Ok(metrics) => (StatusCode::OK, metrics),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::from("Failed to gather metrics"))
        }
    }
}

pub fn build_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Serve the consumer's registry until `shutdown` flips to true
pub async fn serve(
    registry: Registry,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics listening on {}", addr);

    axum::serve(listener, build_router(registry))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
