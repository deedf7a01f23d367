use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use common::gather_metrics;

use crate::handlers;
use crate::state::AppState;

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match gather_metrics(&state.registry) {
        Ok(metrics) => (StatusCode::OK, metrics),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::from("Failed to gather metrics"))
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(metrics_handler))

        // Products
        .route("/api/v1/products", post(handlers::create_product::handle))
        .route(
            "/api/v1/products/search",
            get(handlers::search_products::search_products_handler),
        )
        .route(
            "/api/v1/products/:id",
            get(handlers::get_product::get_product_handler).put(handlers::update_product::handle),
        )
        .with_state(state)
}
