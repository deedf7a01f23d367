//! Dead-letter sink for events that cannot be handled

use crate::ConsumedRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// A record the consumer group gave up on, with enough context to replay it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Original payload, lossily decoded as UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_record(record: &ConsumedRecord, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            source_topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: record.key.clone(),
            payload: record
                .payload
                .as_deref()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            reason: reason.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Failed to create dead-letter producer: {0}")]
    ProducerCreation(String),

    #[error("Failed to serialize dead letter: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to deliver dead letter: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, letter: DeadLetter) -> Result<(), DeadLetterError>;
}

/// Dead-letter sink backed by a Kafka topic
pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaDeadLetterSink {
    pub fn new(config: &KafkaConfig) -> Result<Self, DeadLetterError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all")
            .create()
            .map_err(|e| DeadLetterError::ProducerCreation(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.dead_letter_topic.clone(),
            timeout: config.message_timeout(),
        })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        let payload = serde_json::to_string(&letter)?;
        let key = letter
            .key
            .clone()
            .unwrap_or_else(|| format!("{}-{}-{}", letter.source_topic, letter.partition, letter.offset));

        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                warn!(
                    topic = %self.topic,
                    partition,
                    offset,
                    source_topic = %letter.source_topic,
                    source_offset = letter.offset,
                    reason = %letter.reason,
                    "Event routed to dead-letter topic"
                );
                Ok(())
            }
            Err((e, _)) => {
                error!(
                    error = %e,
                    source_topic = %letter.source_topic,
                    source_offset = letter.offset,
                    "Failed to send dead letter"
                );
                Err(DeadLetterError::Delivery(e.to_string()))
            }
        }
    }
}

/// Dead-letter sink that keeps letters in memory
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
    failing: AtomicBool,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeadLetterError::Delivery("sink unavailable".to_string()));
        }
        self.letters.lock().await.push(letter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ConsumedRecord {
        ConsumedRecord {
            topic: "product.created".to_string(),
            partition: 2,
            offset: 41,
            key: Some("abc".to_string()),
            payload: Some(b"{not json".to_vec()),
        }
    }

    #[test]
    fn test_dead_letter_keeps_source_position() {
        let letter = DeadLetter::from_record(&record(), "undecodable", 1);
        assert_eq!(letter.source_topic, "product.created");
        assert_eq!(letter.partition, 2);
        assert_eq!(letter.offset, 41);
        assert_eq!(letter.payload.as_deref(), Some("{not json"));
        assert_eq!(letter.attempts, 1);
    }

    #[test]
    fn test_dead_letter_serialization() {
        let mut rec = record();
        rec.key = None;
        let json = serde_json::to_value(DeadLetter::from_record(&rec, "boom", 5)).unwrap();
        assert_eq!(json["reason"], "boom");
        assert!(json.get("key").is_none());
    }

    #[tokio::test]
    async fn test_in_memory_sink_failure() {
        let sink = InMemoryDeadLetterSink::new();
        sink.set_failing(true);
        let result = sink.send(DeadLetter::from_record(&record(), "x", 1)).await;
        assert!(matches!(result, Err(DeadLetterError::Delivery(_))));
        assert!(sink.letters().await.is_empty());
    }
}
