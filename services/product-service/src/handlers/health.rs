use axum::{extract::State, http::StatusCode, Json};
use catalog::DependencyHealth;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub store: &'static str,
    pub cache: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub dependencies: DependencyStatus,
}

fn reachability(up: bool) -> &'static str {
    if up {
        "up"
    } else {
        "down"
    }
}

impl From<DependencyHealth> for HealthResponse {
    fn from(health: DependencyHealth) -> Self {
        let status = match (health.store, health.cache) {
            (true, true) => "healthy",
            (true, false) => "degraded",
            (false, _) => "unhealthy",
        };

        HealthResponse {
            status,
            service: "product-service",
            version: env!("CARGO_PKG_VERSION"),
            dependencies: DependencyStatus {
                store: reachability(health.store),
                cache: reachability(health.cache),
            },
        }
    }
}

/// Liveness plus store and cache reachability.
///
/// A cache outage only degrades reads, so it still answers 200; without the
/// store the service cannot serve and answers 503.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.service.check_health(state.deadline()).await;
    let code = if health.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health.into()))
}
