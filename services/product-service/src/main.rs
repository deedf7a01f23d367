use anyhow::Result;
use common::{init_telemetry, AppConfig};
use signal_hook::consts::signal::*;
use signal_hook_tokio::Signals;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod handlers;
mod routes;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env();

    let _telemetry = init_telemetry(config.telemetry.clone()).map_err(|e| anyhow::anyhow!(e))?;

    info!("Starting product service...");
    info!(
        conflict_retries = config.consistency.conflict_retries,
        request_timeout_ms = config.consistency.request_timeout_ms,
        cache_ttl_seconds = config.consistency.cache_ttl_seconds,
        "Consistency settings"
    );

    // Initialize application state
    let (state, publisher) = state::AppState::connect(&config).await?;

    // Build router with tracing layer
    let app = routes::build_router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!("Product service listening on {}", addr);

    // Setup signal handling
    let signals = Signals::new([SIGTERM, SIGINT])?;
    let handle = signals.handle();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(signals))
        .await
        .map_err(|e| {
            tracing::error!("Server error: {}", e);
            e
        })?;

    info!("Draining event publisher...");
    handle.close();
    if let Err(e) = publisher.close().await {
        warn!(error = %e, "Event publisher did not drain cleanly");
    }
    info!("Product service stopped");

    Ok(())
}

async fn shutdown_signal(mut signals: Signals) {
    use futures_util::stream::StreamExt;
    while let Some(signal) = signals.next().await {
        if matches!(signal, SIGTERM | SIGINT) {
            info!("Received shutdown signal, stopping...");
            break;
        }
    }
}
