pub mod memory;
pub mod redis_cache;

pub use memory::InMemoryProductCache;
pub use redis_cache::RedisProductCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::Product;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Snapshot of a product captured at a given revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub product: Product,
    pub revision: i64,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn from_product(product: &Product) -> Self {
        Self {
            product: product.clone(),
            revision: product.revision,
            cached_at: Utc::now(),
        }
    }
}

/// Result of a revision-guarded `set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Stored,
    /// The cache already held a newer revision, or a newer mutation
    /// invalidated the key
    Ignored,
}

/// Volatile key-value cache in front of the product store.
///
/// Never a source of truth. Callers are expected to log and swallow every
/// error returned here.
///
/// Invalidation does not forget the key entirely: it leaves a tombstone
/// holding the committed revision for `ttl`. Reads treat the tombstone as a
/// miss, while `set` still compares against it, so a snapshot older than
/// the mutation cannot slip back in after the entry was dropped.
#[async_trait]
pub trait ProductCache: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `entry` unless the cache already holds a strictly newer revision
    /// (cached or tombstoned). Equal revisions overwrite.
    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> Result<SetOutcome, CacheError>;

    /// Drop the cached snapshot of `id`, keeping `revision` as the lowest
    /// revision a later `set` may store. Idempotent; the floor never moves
    /// backwards.
    async fn invalidate(&self, id: Uuid, revision: i64, ttl: Duration) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

pub(crate) fn cache_key(id: Uuid) -> String {
    format!("product:{}", id)
}
