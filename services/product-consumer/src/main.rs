use anyhow::Result;
use catalog::CacheSyncHandler;
use common::{init_telemetry, AppConfig, ProductMetrics};
use messaging::{BatchProcessor, EventTopics, KafkaConsumerGroup, KafkaDeadLetterSink};
use product_cache::RedisProductCache;
use prometheus::Registry;
use signal_hook::consts::signal::*;
use signal_hook_tokio::Signals;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

mod metrics_server;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::from_env();
    if std::env::var("SERVICE_NAME").is_err() {
        config.telemetry.service_name = "product-consumer".to_string();
    }

    let _telemetry = init_telemetry(config.telemetry.clone()).map_err(|e| anyhow::anyhow!(e))?;

    info!("Starting product consumer...");
    info!("Configuration:");
    info!("  Kafka Brokers: {}", config.kafka.brokers);
    info!("  Consumer Group: {}", config.kafka.group_id);
    info!("  Dead-letter Topic: {}", config.kafka.dead_letter_topic);
    info!("  Redis URL: {}", config.redis.url);

    // Connect to cache
    info!("Connecting to Redis...");
    let cache = RedisProductCache::new(&config.redis.url).await?;
    info!("Redis connected successfully");

    let registry = Registry::new();
    let metrics = ProductMetrics::register(&registry)?;

    let handler = CacheSyncHandler::new(Arc::new(cache), config.consistency.cache_ttl());
    let dead_letters = KafkaDeadLetterSink::new(&config.kafka)?;
    let processor = BatchProcessor::new(
        Arc::new(handler),
        Arc::new(dead_letters),
        config.kafka.max_attempts,
        metrics,
    );

    // Create Kafka consumer
    info!("Creating Kafka consumer...");
    let topics = EventTopics::from_config(&config.kafka);
    let consumer = KafkaConsumerGroup::new(&config.kafka, &topics, processor)?;
    info!("Kafka consumer created successfully");

    // Setup signal handling
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_task = tokio::spawn(metrics_server::serve(
        registry,
        config.metrics_port,
        shutdown_rx.clone(),
    ));

    let signals = Signals::new([SIGTERM, SIGINT])?;
    let handle = signals.handle();

    let signal_task = tokio::spawn(async move {
        use futures_util::stream::StreamExt;
        let mut signals = signals;
        while let Some(signal) = signals.next().await {
            match signal {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping...");
                    let _ = shutdown_tx.send(true);
                    break;
                }
                _ => {}
            }
        }
    });

    info!("Starting event consumption loop...");
    consumer.run(shutdown_rx).await;

    // Cleanup
    info!("Shutting down product consumer...");
    handle.close();
    signal_task.abort();
    match metrics_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics listener failed: {}", e),
        Err(e) => error!("Metrics task panicked: {}", e),
    }
    info!("Product consumer stopped");

    Ok(())
}
