use crate::{EventPublisher, EventTopics, PublishError, PublishReceipt};
use async_trait::async_trait;
use common::{with_retry, KafkaConfig, RetryPolicy};
use domain::ProductEvent;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Kafka publisher for product events.
///
/// Retries transient broker errors itself (librdkafka's internal retries are
/// disabled so the retry budget is exact). The number of concurrent sends is
/// bounded by a semaphore; `close` waits for them and flushes the queue.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topics: EventTopics,
    retry_policy: RetryPolicy,
    message_timeout: Duration,
    in_flight: Semaphore,
    max_in_flight: u32,
    closed: AtomicBool,
}

impl KafkaEventPublisher {
    /// Create a new publisher. Creation does not contact the brokers.
    pub fn new(config: &KafkaConfig) -> Result<Self, PublishError> {
        info!(
            brokers = %config.brokers,
            acks = config.acks.as_kafka_value(),
            "Creating Kafka producer"
        );

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", config.acks.as_kafka_value())
            .set("partitioner", "murmur2_random")
            .set("compression.type", "snappy")
            .set("retries", "0")
            .create()
            .map_err(|e| PublishError::ProducerCreation(e.to_string()))?;

        let max_in_flight = config.max_in_flight.max(1) as u32;

        Ok(Self {
            producer,
            topics: EventTopics::from_config(config),
            retry_policy: config.publish_retry_policy(),
            message_timeout: config.message_timeout(),
            in_flight: Semaphore::new(max_in_flight as usize),
            max_in_flight,
            closed: AtomicBool::new(false),
        })
    }

    async fn send_once(&self, topic: &str, key: &str, payload: &str) -> Result<(i32, i64), KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, Timeout::After(self.message_timeout))
            .await
            .map_err(|(err, _)| err)
    }

    /// Stop accepting events, wait for in-flight sends and flush the queue
    pub async fn close(&self) -> Result<(), PublishError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Every permit back means no send is in progress
        let _drained = self
            .in_flight
            .acquire_many(self.max_in_flight)
            .await
            .map_err(|_| PublishError::Closed)?;

        let producer = self.producer.clone();
        let timeout = self.message_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| PublishError::PublishFailed {
                topic: "*".to_string(),
                reason: format!("flush task failed: {}", e),
            })?
            .map_err(|e| PublishError::PublishFailed {
                topic: "*".to_string(),
                reason: format!("flush failed: {}", e),
            })?;

        info!("Kafka producer drained and closed");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &ProductEvent) -> Result<PublishReceipt, PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }

        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| PublishError::Closed)?;

        let topic = self.topics.topic_for(event.kind);
        let payload = serde_json::to_string(event)?;
        let key = event.product_id.to_string();

        let result = with_retry(&self.retry_policy, is_transient, || {
            self.send_once(topic, &key, &payload)
        })
        .await;

        match result {
            Ok((partition, offset)) => {
                debug!(
                    topic,
                    partition,
                    offset,
                    product_id = %event.product_id,
                    revision = event.revision(),
                    event_type = event.kind.as_str(),
                    "Event published"
                );
                Ok(PublishReceipt {
                    topic: topic.to_string(),
                    partition,
                    offset,
                })
            }
            Err(e) => {
                warn!(
                    topic,
                    product_id = %event.product_id,
                    error = %e,
                    "Failed to publish event"
                );
                Err(PublishError::PublishFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl Drop for KafkaEventPublisher {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.producer.flush(Timeout::After(self.message_timeout)) {
            error!(error = %e, "Failed to flush Kafka producer on drop");
        }
    }
}

/// Broker errors worth another attempt
pub(crate) fn is_transient(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::QueueFull
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::NotEnoughReplicas
                | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::Product;
    use uuid::Uuid;

    fn product() -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            name: "Widget".to_string(),
            description: String::new(),
            price: 10.0,
            image_url: None,
            revision: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_publisher_creation_does_not_connect() {
        let config = KafkaConfig {
            brokers: "invalid:9092".to_string(),
            ..KafkaConfig::default()
        };
        assert!(KafkaEventPublisher::new(&config).is_ok());
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&KafkaError::MessageProduction(
            RDKafkaErrorCode::QueueFull
        )));
        assert!(is_transient(&KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageTimedOut
        )));
        assert!(!is_transient(&KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageSizeTooLarge
        )));
        assert!(!is_transient(&KafkaError::Canceled));
    }

    #[tokio::test]
    async fn test_closed_publisher_rejects_events() {
        let config = KafkaConfig {
            brokers: "invalid:9092".to_string(),
            message_timeout_ms: 100,
            ..KafkaConfig::default()
        };
        let publisher = KafkaEventPublisher::new(&config).unwrap();
        publisher.close().await.unwrap();

        let result = publisher.publish_created(&product()).await;
        assert!(matches!(result, Err(PublishError::Closed)));
    }

    #[tokio::test]
    #[ignore] // Requires Kafka to be running
    async fn test_publish_created() {
        let brokers =
            std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let config = KafkaConfig {
            brokers,
            ..KafkaConfig::default()
        };
        let publisher = KafkaEventPublisher::new(&config).unwrap();

        let receipt = publisher.publish_created(&product()).await.unwrap();
        assert_eq!(receipt.topic, "product.created");
        assert!(receipt.offset >= 0);

        publisher.close().await.unwrap();
    }
}
