use super::{CacheEntry, CacheError, ProductCache, SetOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

/// A cached snapshot, or a tombstone (`entry: None`) left by invalidation
struct Slot {
    entry: Option<CacheEntry>,
    revision: i64,
    expires_at: Instant,
}

/// Process-local cache with the same revision guard and TTL behaviour as
/// [`RedisProductCache`](crate::RedisProductCache).
#[derive(Default)]
pub struct InMemoryProductCache {
    slots: RwLock<HashMap<Uuid, Slot>>,
    unavailable: AtomicBool,
}

impl InMemoryProductCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Revision of the cached snapshot for `id`, ignoring expiry and the
    /// outage toggle. Tombstones read as `None`.
    pub async fn peek_revision(&self, id: Uuid) -> Option<i64> {
        self.slots
            .read()
            .await
            .get(&id)
            .and_then(|s| s.entry.as_ref())
            .map(|e| e.revision)
    }

    /// Revision guarding `id`, whether cached or tombstoned
    pub async fn peek_floor(&self, id: Uuid) -> Option<i64> {
        self.slots.read().await.get(&id).map(|s| s.revision)
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("in-memory cache offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductCache for InMemoryProductCache {
    async fn get(&self, id: Uuid) -> Result<Option<CacheEntry>, CacheError> {
        self.check_available()?;

        let mut slots = self.slots.write().await;
        match slots.get(&id) {
            Some(slot) if slot.expires_at <= Instant::now() => {
                slots.remove(&id);
                Ok(None)
            }
            Some(slot) => Ok(slot.entry.clone()),
            None => Ok(None),
        }
    }

    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> Result<SetOutcome, CacheError> {
        self.check_available()?;

        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let id = entry.product.id;

        if let Some(existing) = slots.get(&id) {
            if existing.expires_at > now && existing.revision > entry.revision {
                return Ok(SetOutcome::Ignored);
            }
        }

        slots.insert(
            id,
            Slot {
                entry: Some(entry.clone()),
                revision: entry.revision,
                expires_at: now + ttl,
            },
        );
        Ok(SetOutcome::Stored)
    }

    async fn invalidate(&self, id: Uuid, revision: i64, ttl: Duration) -> Result<(), CacheError> {
        self.check_available()?;

        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let floor = match slots.get(&id) {
            Some(existing) if existing.expires_at > now => existing.revision.max(revision),
            _ => revision,
        };

        slots.insert(
            id,
            Slot {
                entry: None,
                revision: floor,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check_available()
    }
}
