//! Transport-independent batch handling for the consumer group.
//!
//! Delivery is at-least-once: a handler failure redelivers the whole batch
//! from its first record, so handlers must be idempotent. A record that keeps
//! failing is moved to the dead-letter sink once its attempt budget is spent,
//! and the batch advances past it.

use crate::dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};
use async_trait::async_trait;
use common::{ProductMetrics, RetryPolicy};
use domain::{EventSequence, ProductEvent};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A message as delivered by the broker, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
}

impl ConsumedRecord {
    /// Decode the payload into a product event carrying its log position
    pub fn decode(&self) -> Result<ProductEvent, String> {
        let payload = self
            .payload
            .as_deref()
            .ok_or_else(|| "message has no payload".to_string())?;

        let event: ProductEvent = serde_json::from_slice(payload)
            .map_err(|e| format!("invalid event payload: {}", e))?;

        if event.product_id != event.product.id {
            return Err(format!(
                "event header {} does not match snapshot {}",
                event.product_id, event.product.id
            ));
        }

        Ok(event.with_sequence(EventSequence {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }))
    }
}

/// Side effect applied to every consumed event. Must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ProductEvent) -> Result<(), HandlerError>;
}

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Worth redelivering
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// Redelivery cannot help; dead-letter right away
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

/// What happened to one batch
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
    /// Distinct records handled successfully
    pub handled: usize,
    pub dead_lettered: usize,
    /// How many times the batch was restarted after a handler failure
    pub redeliveries: u32,
    /// Next offset to commit for each (topic, partition) seen in the batch
    pub offsets: BTreeMap<(String, i32), i64>,
}

pub struct BatchProcessor {
    handler: Arc<dyn EventHandler>,
    dead_letters: Arc<dyn DeadLetterSink>,
    max_attempts: u32,
    redelivery_backoff: RetryPolicy,
    metrics: ProductMetrics,
}

impl BatchProcessor {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        dead_letters: Arc<dyn DeadLetterSink>,
        max_attempts: u32,
        metrics: ProductMetrics,
    ) -> Self {
        Self {
            handler,
            dead_letters,
            max_attempts: max_attempts.max(1),
            redelivery_backoff: RetryPolicy::default(),
            metrics,
        }
    }

    pub fn with_redelivery_backoff(mut self, policy: RetryPolicy) -> Self {
        self.redelivery_backoff = policy;
        self
    }

    /// Handle every record of `batch`.
    ///
    /// Returns the offsets to commit. An error means a dead letter could not
    /// be delivered; nothing of this batch may be committed then.
    pub async fn process(&self, batch: &[ConsumedRecord]) -> Result<BatchReport, DeadLetterError> {
        let mut report = BatchReport::default();
        for record in batch {
            let next = record.offset + 1;
            report
                .offsets
                .entry((record.topic.clone(), record.partition))
                .and_modify(|o| *o = (*o).max(next))
                .or_insert(next);
        }

        let decoded: Vec<Result<ProductEvent, String>> =
            batch.iter().map(ConsumedRecord::decode).collect();
        let mut failures: HashMap<usize, u32> = HashMap::new();
        let mut settled: HashSet<usize> = HashSet::new();
        let mut handled: HashSet<usize> = HashSet::new();

        'delivery: loop {
            for (idx, record) in batch.iter().enumerate() {
                if settled.contains(&idx) {
                    continue;
                }

                let event = match &decoded[idx] {
                    Ok(event) => event,
                    Err(reason) => {
                        warn!(
                            topic = %record.topic,
                            partition = record.partition,
                            offset = record.offset,
                            reason = %reason,
                            "Poison record"
                        );
                        self.dead_letter(record, reason, 1).await?;
                        settled.insert(idx);
                        report.dead_lettered += 1;
                        continue;
                    }
                };

                match self.handler.handle(event).await {
                    Ok(()) => {
                        self.metrics.record_consumed(event.kind.as_str(), true);
                        handled.insert(idx);
                    }
                    Err(HandlerError::Permanent(reason)) => {
                        self.metrics.record_consumed(event.kind.as_str(), false);
                        let attempts = failures.get(&idx).copied().unwrap_or(0) + 1;
                        self.dead_letter(record, &reason, attempts).await?;
                        settled.insert(idx);
                        report.dead_lettered += 1;
                    }
                    Err(HandlerError::Transient(reason)) => {
                        self.metrics.record_consumed(event.kind.as_str(), false);
                        let attempts = failures.entry(idx).or_insert(0);
                        *attempts += 1;

                        if *attempts >= self.max_attempts {
                            let attempts = *attempts;
                            self.dead_letter(record, &reason, attempts).await?;
                            settled.insert(idx);
                            report.dead_lettered += 1;
                            continue;
                        }

                        report.redeliveries += 1;
                        let delay = self.redelivery_backoff.backoff(report.redeliveries);
                        warn!(
                            topic = %record.topic,
                            partition = record.partition,
                            offset = record.offset,
                            attempt = *attempts,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "Handler failed, redelivering batch"
                        );
                        tokio::time::sleep(delay).await;
                        continue 'delivery;
                    }
                }
            }
            break;
        }

        report.handled = handled.difference(&settled).count();
        debug!(
            records = batch.len(),
            handled = report.handled,
            dead_lettered = report.dead_lettered,
            redeliveries = report.redeliveries,
            "Batch processed"
        );
        Ok(report)
    }

    async fn dead_letter(
        &self,
        record: &ConsumedRecord,
        reason: &str,
        attempts: u32,
    ) -> Result<(), DeadLetterError> {
        self.dead_letters
            .send(DeadLetter::from_record(record, reason, attempts))
            .await?;
        self.metrics.record_dead_letter(&record.topic);
        info!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            attempts,
            "Record dead-lettered, advancing past it"
        );
        Ok(())
    }
}
