use crate::{ConsumedRecord, EventPublisher, EventTopics, PublishError, PublishReceipt};
use async_trait::async_trait;
use domain::ProductEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct LogState {
    /// Records of each (topic, partition) in append order
    partitions: HashMap<(String, i32), Vec<ConsumedRecord>>,
    /// Every record in global append order
    appended: Vec<ConsumedRecord>,
}

/// Partitioned in-process event log.
///
/// Routes events like the Kafka publisher does: key = product id, same id
/// always on the same partition. Offsets are dense per partition.
pub struct InMemoryEventLog {
    topics: EventTopics,
    partition_count: i32,
    state: Mutex<LogState>,
    failing: AtomicBool,
}

impl InMemoryEventLog {
    pub fn new(partition_count: i32) -> Self {
        Self {
            topics: EventTopics::default(),
            partition_count: partition_count.max(1),
            state: Mutex::new(LogState::default()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn single_partition() -> Self {
        Self::new(1)
    }

    /// While set, every publish fails with `PublishFailed`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn partition_for(&self, product_id: Uuid) -> i32 {
        let hash = product_id
            .as_bytes()
            .iter()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u32));
        (hash % self.partition_count as u32) as i32
    }

    /// All records in the order they were appended
    pub async fn records(&self) -> Vec<ConsumedRecord> {
        self.state.lock().await.appended.clone()
    }

    pub async fn partition_records(&self, topic: &str, partition: i32) -> Vec<ConsumedRecord> {
        self.state
            .lock()
            .await
            .partitions
            .get(&(topic.to_string(), partition))
            .cloned()
            .unwrap_or_default()
    }

    /// Decoded events in append order
    pub async fn events(&self) -> Vec<ProductEvent> {
        self.records()
            .await
            .iter()
            .filter_map(|r| r.payload.as_deref())
            .filter_map(|p| serde_json::from_slice(p).ok())
            .collect()
    }

    pub async fn events_for(&self, product_id: Uuid) -> Vec<ProductEvent> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.product_id == product_id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.appended.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventLog {
    async fn publish(&self, event: &ProductEvent) -> Result<PublishReceipt, PublishError> {
        let topic = self.topics.topic_for(event.kind).to_string();

        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::PublishFailed {
                topic,
                reason: "broker unavailable".to_string(),
            });
        }

        let payload = serde_json::to_vec(event)?;
        let partition = self.partition_for(event.product_id);

        let mut state = self.state.lock().await;
        let log = state
            .partitions
            .entry((topic.clone(), partition))
            .or_default();
        let record = ConsumedRecord {
            topic: topic.clone(),
            partition,
            offset: log.len() as i64,
            key: Some(event.product_id.to_string()),
            payload: Some(payload),
        };
        log.push(record.clone());
        state.appended.push(record.clone());

        Ok(PublishReceipt {
            topic,
            partition,
            offset: record.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::Product;

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

    #[tokio::test]
    async fn test_same_product_same_partition() {
        let log = InMemoryEventLog::new(8);
        let mut p = product();

        let first = log.publish_created(&p).await.unwrap();
        p.revision = 2;
        let second = log.publish_updated(&p).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(first.partition, log.partition_for(p.id));
        assert_eq!(first.topic, "product.created");
        assert_eq!(second.topic, "product.updated");
    }

    #[tokio::test]
    async fn test_offsets_are_dense_per_partition() {
        let log = InMemoryEventLog::single_partition();
        let p = product();

        for expected in 0..3 {
            let receipt = log.publish_created(&p).await.unwrap();
            assert_eq!(receipt.offset, expected);
        }
        assert_eq!(log.partition_records("product.created", 0).await.len(), 3);
    }

    #[tokio::test]
    async fn test_failing_log_appends_nothing() {
        let log = InMemoryEventLog::single_partition();
        log.set_failing(true);

        let result = log.publish_created(&product()).await;
        assert!(matches!(result, Err(PublishError::PublishFailed { .. })));
        assert!(log.is_empty().await);
    }
}
