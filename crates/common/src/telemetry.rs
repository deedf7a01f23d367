use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_level: String,
    pub jaeger_endpoint: Option<String>,
    pub enable_jaeger: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "product-service".to_string(),
            log_level: "info".to_string(),
            jaeger_endpoint: Some("localhost:6831".to_string()),
            enable_jaeger: false,
        }
    }
}

/// Keeps the tracer pipeline alive; flushes and shuts it down when dropped.
///
/// Owned by `main` so that nothing below the binary depends on process-wide
/// telemetry state.
#[must_use = "telemetry is shut down as soon as the guard is dropped"]
pub struct TelemetryGuard {
    jaeger_enabled: bool,
}

impl TelemetryGuard {
    pub fn jaeger_enabled(&self) -> bool {
        self.jaeger_enabled
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.jaeger_enabled {
            global::shutdown_tracer_provider();
        }
    }
}

/// Initialize tracing/logging for the application with optional Jaeger support
pub fn init_telemetry(
    config: TelemetryConfig,
) -> Result<TelemetryGuard, Box<dyn std::error::Error + Send + Sync>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .json();

    if config.enable_jaeger {
        let tracer = opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name(&config.service_name)
            .with_endpoint(
                config
                    .jaeger_endpoint
                    .unwrap_or_else(|| "localhost:6831".to_string()),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(telemetry_layer)
            .try_init()?;

        tracing::info!(
            service = %config.service_name,
            "Telemetry initialized with Jaeger tracing"
        );
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        tracing::info!(
            service = %config.service_name,
            "Telemetry initialized without Jaeger"
        );
    }

    Ok(TelemetryGuard {
        jaeger_enabled: config.enable_jaeger,
    })
}
