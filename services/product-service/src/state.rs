use anyhow::Result;
use catalog::{Deadline, ProductService};
use common::{AppConfig, ProductMetrics};
use messaging::KafkaEventPublisher;
use product_cache::RedisProductCache;
use product_store::PostgresProductStore;
use prometheus::Registry;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ProductService>,
    pub registry: Registry,
    pub request_timeout: Duration,
}

impl AppState {
    /// Connect to Postgres, Redis and Kafka.
    ///
    /// The publisher is returned separately so `main` can drain it after the
    /// server has stopped.
    pub async fn connect(config: &AppConfig) -> Result<(Self, Arc<KafkaEventPublisher>)> {
        info!("Connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database_url)
            .await?;
        let store = PostgresProductStore::new(pool);
        store.migrate().await?;

        info!(redis_url = %config.redis.url, "Connecting to Redis");
        let cache = RedisProductCache::new(&config.redis.url).await?;

        info!(brokers = %config.kafka.brokers, "Creating Kafka event publisher");
        let publisher = Arc::new(KafkaEventPublisher::new(&config.kafka)?);

        let registry = Registry::new();
        let metrics = ProductMetrics::register(&registry)?;

        let service = ProductService::new(
            Arc::new(store),
            Arc::new(cache),
            publisher.clone(),
            &config.consistency,
            metrics,
        );

        Ok((
            Self::new(
                Arc::new(service),
                registry,
                config.consistency.request_timeout(),
            ),
            publisher,
        ))
    }

    pub fn new(service: Arc<ProductService>, registry: Registry, request_timeout: Duration) -> Self {
        Self {
            service,
            registry,
            request_timeout,
        }
    }

    /// Deadline for a request starting now
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}
