use async_trait::async_trait;
use domain::ProductEvent;
use messaging::{EventHandler, HandlerError};
use product_cache::{CacheEntry, CacheError, ProductCache, SetOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Consumer-side handler that warms the cache from event snapshots.
///
/// Writes go through the cache's revision guard, so a duplicate or an older
/// event leaves the cache as it was. That includes an event overtaken by a
/// later mutation whose invalidation already tombstoned the key. Events only
/// carry committed state, so the cache never leads the store.
pub struct CacheSyncHandler {
    cache: Arc<dyn ProductCache>,
    ttl: Duration,
}

impl CacheSyncHandler {
    pub fn new(cache: Arc<dyn ProductCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl EventHandler for CacheSyncHandler {
    async fn handle(&self, event: &ProductEvent) -> Result<(), HandlerError> {
        let entry = CacheEntry::from_product(&event.product);

        match self.cache.set(&entry, self.ttl).await {
            Ok(SetOutcome::Stored) => {
                debug!(
                    product_id = %event.product_id,
                    revision = event.revision(),
                    event_type = event.kind.as_str(),
                    "Cache warmed from event"
                );
                Ok(())
            }
            Ok(SetOutcome::Ignored) => {
                debug!(
                    product_id = %event.product_id,
                    revision = event.revision(),
                    "Cache already newer than event"
                );
                Ok(())
            }
            Err(CacheError::Unavailable(reason)) => Err(HandlerError::Transient(reason)),
            Err(e) => Err(HandlerError::Permanent(e.to_string())),
        }
    }
}
