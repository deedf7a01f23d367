pub mod batch;
pub mod consumer;
pub mod dead_letter;
pub mod memory;
pub mod producer;

pub use batch::{BatchProcessor, BatchReport, ConsumedRecord, EventHandler, HandlerError};
pub use consumer::{ConsumerError, KafkaConsumerGroup};
pub use dead_letter::{
    DeadLetter, DeadLetterError, DeadLetterSink, InMemoryDeadLetterSink, KafkaDeadLetterSink,
};
pub use memory::InMemoryEventLog;
pub use producer::KafkaEventPublisher;

use async_trait::async_trait;
use common::KafkaConfig;
use domain::{EventKind, Product, ProductEvent};
use thiserror::Error;

/// Topic names of the product event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopics {
    pub created: String,
    pub updated: String,
}

impl EventTopics {
    pub fn from_config(config: &KafkaConfig) -> Self {
        Self {
            created: config.created_topic.clone(),
            updated: config.updated_topic.clone(),
        }
    }

    pub fn topic_for(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Created => &self.created,
            EventKind::Updated => &self.updated,
        }
    }

    pub fn all(&self) -> [&str; 2] {
        [&self.created, &self.updated]
    }
}

impl Default for EventTopics {
    fn default() -> Self {
        Self {
            created: "product.created".to_string(),
            updated: "product.updated".to_string(),
        }
    }
}

/// Broker acknowledgment of a durably appended event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Appends product events to the partitioned log.
///
/// A call returns only once the broker has acknowledged the event at the
/// configured level. Events are keyed by product id, so every event of one
/// product lands on the same partition.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ProductEvent) -> Result<PublishReceipt, PublishError>;

    async fn publish_created(&self, product: &Product) -> Result<PublishReceipt, PublishError> {
        self.publish(&ProductEvent::created(product)).await
    }

    async fn publish_updated(&self, product: &Product) -> Result<PublishReceipt, PublishError> {
        self.publish(&ProductEvent::updated(product)).await
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to create Kafka producer: {0}")]
    ProducerCreation(String),

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to publish event to {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Publisher is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_routing_by_kind() {
        let topics = EventTopics::default();
        assert_eq!(topics.topic_for(EventKind::Created), "product.created");
        assert_eq!(topics.topic_for(EventKind::Updated), "product.updated");
    }

    #[test]
    fn test_topics_from_config() {
        let config = KafkaConfig {
            created_topic: "c".to_string(),
            updated_topic: "u".to_string(),
            ..KafkaConfig::default()
        };
        assert_eq!(EventTopics::from_config(&config).all(), ["c", "u"]);
    }
}
