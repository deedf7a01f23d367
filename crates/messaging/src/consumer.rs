use crate::batch::{BatchProcessor, BatchReport, ConsumedRecord};
use crate::EventTopics;
use common::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::util::Timeout;
use rdkafka::Offset;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Member of the product consumer group.
///
/// Pulls batches from both product topics, hands them to the
/// [`BatchProcessor`] and commits offsets only once a batch is fully handled.
pub struct KafkaConsumerGroup {
    consumer: StreamConsumer,
    processor: BatchProcessor,
    batch_size: usize,
    batch_wait: Duration,
}

impl KafkaConsumerGroup {
    pub fn new(
        config: &KafkaConfig,
        topics: &EventTopics,
        processor: BatchProcessor,
    ) -> Result<Self, ConsumerError> {
        info!(
            group_id = %config.group_id,
            topics = ?topics.all(),
            "Creating Kafka consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "10000")
            .create()?;

        consumer.subscribe(&topics.all())?;

        Ok(Self {
            consumer,
            processor,
            batch_size: config.batch_size.max(1),
            batch_wait: config.batch_wait(),
        })
    }

    /// Consume until `shutdown` flips to true or its sender is dropped.
    ///
    /// A batch in progress is finished first; a batch still being gathered is
    /// abandoned uncommitted and will be redelivered. Broker errors are logged
    /// and retried, never returned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Consumer group loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                batch = self.next_batch() => batch,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };

            match self.processor.process(&batch).await {
                Ok(report) => {
                    if let Err(e) = self.commit(&report) {
                        // Uncommitted offsets only mean duplicates later
                        error!(error = %e, "Failed to commit offsets");
                    }
                }
                Err(e) => {
                    error!(error = %e, records = batch.len(), "Batch aborted, rewinding");
                    self.recover_aborted_batch(&batch);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }

        info!("Consumer group loop stopped");
    }

    /// Rewind after an aborted batch. Returns whether every partition was
    /// rewound.
    ///
    /// A failed seek, typically on a partition revoked by a rebalance, is
    /// not fatal: nothing of the batch was committed, so whoever owns the
    /// partition next resumes from the last committed offset.
    fn recover_aborted_batch(&self, batch: &[ConsumedRecord]) -> bool {
        match self.rewind(batch) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    error = %e,
                    records = batch.len(),
                    "Rewind failed, relying on uncommitted offsets for redelivery"
                );
                false
            }
        }
    }

    /// Wait for one message, then gather more until the batch is full or
    /// `batch_wait` has elapsed.
    async fn next_batch(&self) -> Result<Vec<ConsumedRecord>, KafkaError> {
        let first = self.consumer.recv().await?;
        let mut batch = vec![to_record(&first)];
        drop(first);

        let deadline = Instant::now() + self.batch_wait;
        while batch.len() < self.batch_size {
            match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(Ok(message)) => batch.push(to_record(&message)),
                Ok(Err(e)) => {
                    warn!(error = %e, "Error while gathering batch");
                    break;
                }
                Err(_) => break,
            }
        }

        debug!(records = batch.len(), "Gathered batch");
        Ok(batch)
    }

    fn commit(&self, report: &BatchReport) -> Result<(), KafkaError> {
        if report.offsets.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), next) in &report.offsets {
            tpl.add_partition_offset(topic, *partition, Offset::Offset(*next))?;
        }
        self.consumer.commit(&tpl, CommitMode::Sync)?;

        debug!(partitions = report.offsets.len(), "Committed offsets");
        Ok(())
    }

    /// Seek every partition of `batch` back to its first record
    fn rewind(&self, batch: &[ConsumedRecord]) -> Result<(), KafkaError> {
        for ((topic, partition), offset) in first_offsets(batch) {
            self.consumer
                .seek(&topic, partition, Offset::Offset(offset), Timeout::After(SEEK_TIMEOUT))?;
        }
        Ok(())
    }
}

fn to_record<M: Message>(message: &M) -> ConsumedRecord {
    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: message.payload().map(|p| p.to_vec()),
    }
}

fn first_offsets(batch: &[ConsumedRecord]) -> BTreeMap<(String, i32), i64> {
    let mut firsts = BTreeMap::new();
    for record in batch {
        firsts
            .entry((record.topic.clone(), record.partition))
            .and_modify(|o: &mut i64| *o = (*o).min(record.offset))
            .or_insert(record.offset);
    }
    firsts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::InMemoryDeadLetterSink;
    use crate::{EventHandler, HandlerError};
    use async_trait::async_trait;
    use common::ProductMetrics;
    use domain::ProductEvent;
    use std::sync::Arc;

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle(&self, _event: &ProductEvent) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn processor() -> BatchProcessor {
        BatchProcessor::new(
            Arc::new(NoopHandler),
            Arc::new(InMemoryDeadLetterSink::new()),
            3,
            ProductMetrics::unregistered(),
        )
    }

    fn record(topic: &str, partition: i32, offset: i64) -> ConsumedRecord {
        ConsumedRecord {
            topic: topic.to_string(),
            partition,
            offset,
            key: None,
            payload: None,
        }
    }

    #[test]
    fn test_first_offsets_per_partition() {
        let batch = vec![
            record("product.created", 0, 12),
            record("product.created", 0, 10),
            record("product.updated", 1, 4),
        ];
        let firsts = first_offsets(&batch);
        assert_eq!(firsts.get(&("product.created".to_string(), 0)), Some(&10));
        assert_eq!(firsts.get(&("product.updated".to_string(), 1)), Some(&4));
    }

    #[tokio::test]
    async fn test_consumer_creation_invalid_broker() {
        // Creation succeeds; the connection happens on poll
        let config = KafkaConfig {
            brokers: "invalid:9092".to_string(),
            ..KafkaConfig::default()
        };
        let result = KafkaConsumerGroup::new(&config, &EventTopics::default(), processor());
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = KafkaConfig {
            brokers: "invalid:9092".to_string(),
            ..KafkaConfig::default()
        };
        let group = KafkaConsumerGroup::new(&config, &EventTopics::default(), processor()).unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { group.run(rx).await });
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_failed_rewind_is_not_fatal() {
        let config = KafkaConfig {
            brokers: "invalid:9092".to_string(),
            ..KafkaConfig::default()
        };
        let group = KafkaConsumerGroup::new(&config, &EventTopics::default(), processor()).unwrap();

        // Nothing is assigned to this member, as after a revocation
        let batch = vec![record("product.created", 0, 10), record("product.created", 0, 11)];
        assert!(group.rewind(&batch).is_err());
        assert!(!group.recover_aborted_batch(&batch));
    }
}
