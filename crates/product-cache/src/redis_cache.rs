use super::{cache_key, CacheEntry, CacheError, ProductCache, SetOutcome};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Store the entry only if no newer revision is cached or tombstoned.
/// KEYS[1] = key, ARGV[1] = revision, ARGV[2] = payload, ARGV[3] = ttl seconds.
const GUARDED_SET_SCRIPT: &str = r#"
    local current = redis.call('HGET', KEYS[1], 'revision')
    if current and tonumber(current) > tonumber(ARGV[1]) then
        return 0
    end
    redis.call('HSET', KEYS[1], 'revision', ARGV[1], 'payload', ARGV[2])
    redis.call('EXPIRE', KEYS[1], ARGV[3])
    return 1
"#;

/// Replace the hash with a tombstone holding only the revision floor.
/// KEYS[1] = key, ARGV[1] = committed revision, ARGV[2] = ttl seconds.
const TOMBSTONE_SCRIPT: &str = r#"
    local floor = tonumber(ARGV[1])
    local current = redis.call('HGET', KEYS[1], 'revision')
    if current and tonumber(current) > floor then
        floor = tonumber(current)
    end
    redis.call('DEL', KEYS[1])
    redis.call('HSET', KEYS[1], 'revision', floor)
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return floor
"#;

/// Redis cache for product snapshots.
///
/// Each product lives in a hash at `product:{id}` with a `revision` field
/// (read by the guard script) and a JSON `payload` field. A tombstone is the
/// same hash without `payload`.
pub struct RedisProductCache {
    conn: ConnectionManager,
    guarded_set: Script,
    tombstone: Script,
}

impl RedisProductCache {
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            CacheError::Unavailable(format!("Failed to create Redis client: {}", e))
        })?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;

        info!(redis_url, "Redis product cache initialized");
        Ok(Self {
            conn,
            guarded_set: Script::new(GUARDED_SET_SCRIPT),
            tombstone: Script::new(TOMBSTONE_SCRIPT),
        })
    }
}

#[async_trait]
impl ProductCache for RedisProductCache {
    async fn get(&self, id: Uuid) -> Result<Option<CacheEntry>, CacheError> {
        let key = cache_key(id);

        let payload: Option<String> = self.conn.clone().hget(&key, "payload").await?;
        let Some(payload) = payload else {
            debug!(key = %key, "Cache miss");
            return Ok(None);
        };

        let entry: CacheEntry = serde_json::from_str(&payload).map_err(|e| CacheError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        debug!(key = %key, revision = entry.revision, "Cache hit");
        Ok(Some(entry))
    }

    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> Result<SetOutcome, CacheError> {
        let key = cache_key(entry.product.id);
        let payload = serde_json::to_string(entry)?;
        let ttl_seconds = ttl.as_secs().max(1);

        let stored: i64 = self
            .guarded_set
            .key(&key)
            .arg(entry.revision)
            .arg(payload)
            .arg(ttl_seconds)
            .invoke_async(&mut self.conn.clone())
            .await?;

        if stored == 1 {
            debug!(key = %key, revision = entry.revision, ttl_seconds, "Cached product");
            Ok(SetOutcome::Stored)
        } else {
            debug!(
                key = %key,
                revision = entry.revision,
                "Ignored stale cache write"
            );
            Ok(SetOutcome::Ignored)
        }
    }

    async fn invalidate(&self, id: Uuid, revision: i64, ttl: Duration) -> Result<(), CacheError> {
        let key = cache_key(id);

        let floor: i64 = self
            .tombstone
            .key(&key)
            .arg(revision)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut self.conn.clone())
            .await?;

        debug!(key = %key, floor, "Invalidated cache entry");
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| CacheError::Unavailable(format!("Redis ping failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::Product;

    fn product(revision: i64) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            name: "Widget".to_string(),
            description: "redis".to_string(),
            price: 10.0,
            image_url: None,
            revision,
            created_at: now,
            updated_at: now,
        }
    }

    async fn connect() -> RedisProductCache {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        RedisProductCache::new(&url)
            .await
            .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_cache_operations() {
        let cache = connect().await;
        let entry = CacheEntry::from_product(&product(1));
        let id = entry.product.id;

        let outcome = cache.set(&entry, Duration::from_secs(60)).await.unwrap();
        assert_eq!(outcome, SetOutcome::Stored);

        let cached = cache.get(id).await.unwrap();
        assert_eq!(cached.map(|e| e.revision), Some(1));

        cache.invalidate(id, 2, Duration::from_secs(60)).await.unwrap();
        assert!(cache.get(id).await.unwrap().is_none());

        // Idempotent
        cache.invalidate(id, 2, Duration::from_secs(60)).await.unwrap();

        // The tombstone still guards against the pre-mutation snapshot
        let outcome = cache.set(&entry, Duration::from_secs(60)).await.unwrap();
        assert_eq!(outcome, SetOutcome::Ignored);
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_older_revision_is_ignored() {
        let cache = connect().await;
        let newer = product(3);
        let mut older = newer.clone();
        older.revision = 2;

        cache
            .set(&CacheEntry::from_product(&newer), Duration::from_secs(60))
            .await
            .unwrap();
        let outcome = cache
            .set(&CacheEntry::from_product(&older), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(outcome, SetOutcome::Ignored);
        let cached = cache.get(newer.id).await.unwrap().unwrap();
        assert_eq!(cached.revision, 3);

        cache
            .invalidate(newer.id, 3, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_ping() {
        let cache = connect().await;
        assert!(cache.ping().await.is_ok());
    }
}
