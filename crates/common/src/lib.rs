pub mod config;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use config::{Acks, AppConfig, ConsistencyConfig, KafkaConfig, RedisConfig};
pub use metrics::{gather_metrics, ProductMetrics};
pub use retry::{with_retry, RetryPolicy};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
