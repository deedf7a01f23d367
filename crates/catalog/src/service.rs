use crate::deadline::Deadline;
use crate::errors::ProductError;
use common::{ConsistencyConfig, ProductMetrics};
use domain::{
    CreateProductCommand, Pagination, Product, ProductEvent, ProductPage, UpdateProductCommand,
};
use messaging::EventPublisher;
use product_cache::{CacheEntry, ProductCache};
use product_store::ProductStore;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Terminal state of a mutation that reached the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Committed,
    /// Durable in the store, but its event never reached the broker
    CommittedEventPending,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Committed => "committed",
            MutationStatus::CommittedEventPending => "committed_event_pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub product: Product,
    pub status: MutationStatus,
}

impl MutationOutcome {
    pub fn event_pending(&self) -> bool {
        self.status == MutationStatus::CommittedEventPending
    }
}

/// Reachability of the orchestrator's dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyHealth {
    pub store: bool,
    pub cache: bool,
}

impl DependencyHealth {
    /// The store is required; a cache outage only degrades reads
    pub fn is_serving(&self) -> bool {
        self.store
    }
}

/// Product orchestrator.
///
/// Writes go to the store first; only a successful write touches the cache
/// (invalidation) and the broker (event). Reads go through the cache and
/// refill it lazily from the store.
pub struct ProductService {
    store: Arc<dyn ProductStore>,
    cache: Arc<dyn ProductCache>,
    publisher: Arc<dyn EventPublisher>,
    conflict_retries: u32,
    cache_ttl: Duration,
    metrics: ProductMetrics,
}

impl ProductService {
    pub fn new(
        store: Arc<dyn ProductStore>,
        cache: Arc<dyn ProductCache>,
        publisher: Arc<dyn EventPublisher>,
        config: &ConsistencyConfig,
        metrics: ProductMetrics,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            conflict_retries: config.conflict_retries,
            cache_ttl: config.cache_ttl(),
            metrics,
        }
    }

    #[instrument(skip(self, command), fields(name = %command.name))]
    pub async fn create(
        &self,
        command: CreateProductCommand,
        deadline: Deadline,
    ) -> Result<MutationOutcome, ProductError> {
        if let Err(e) = command.validate() {
            self.metrics.record_mutation("create", "rejected");
            return Err(e.into());
        }

        let new_product = command.into_new_product();
        let product = match self
            .store_call("create", deadline, self.store.create(&new_product))
            .await
        {
            Ok(product) => product,
            Err(e) => {
                warn!(error = %e, "Product create failed");
                self.metrics.record_mutation("create", "failed");
                return Err(e);
            }
        };

        self.invalidate(&product, deadline).await;
        let status = self.publish(ProductEvent::created(&product), deadline).await;

        info!(product_id = %product.id, status = status.as_str(), "Product created");
        self.metrics.record_mutation("create", status.as_str());
        Ok(MutationOutcome { product, status })
    }

    #[instrument(skip(self, command), fields(product_id = %command.id, revision = command.revision))]
    pub async fn update(
        &self,
        command: UpdateProductCommand,
        deadline: Deadline,
    ) -> Result<MutationOutcome, ProductError> {
        if let Err(e) = command.validate() {
            self.metrics.record_mutation("update", "rejected");
            return Err(e.into());
        }

        let product = match self.apply_update(command, deadline).await {
            Ok(product) => product,
            Err(e) => {
                warn!(error = %e, "Product update failed");
                let outcome = match e {
                    ProductError::Conflict { .. } => "conflict",
                    _ => "failed",
                };
                self.metrics.record_mutation("update", outcome);
                return Err(e);
            }
        };

        self.invalidate(&product, deadline).await;
        let status = self.publish(ProductEvent::updated(&product), deadline).await;

        info!(
            product_id = %product.id,
            revision = product.revision,
            status = status.as_str(),
            "Product updated"
        );
        self.metrics.record_mutation("update", status.as_str());
        Ok(MutationOutcome { product, status })
    }

    /// Compare-and-swap loop: on conflict, re-read the current revision and
    /// re-apply the caller's attributes, up to `conflict_retries` times
    async fn apply_update(
        &self,
        command: UpdateProductCommand,
        deadline: Deadline,
    ) -> Result<Product, ProductError> {
        let mut update = command.into_update();
        let mut retries = 0;

        loop {
            match self
                .store_call("update", deadline, self.store.update(&update))
                .await
            {
                Ok(product) => return Ok(product),
                Err(ProductError::Conflict {
                    id,
                    expected,
                    actual,
                }) if retries < self.conflict_retries => {
                    retries += 1;
                    let current = self
                        .store_call("get", deadline, self.store.get_by_id(id))
                        .await?
                        .ok_or(ProductError::NotFound(id))?;

                    debug!(
                        expected,
                        actual,
                        fresh = current.revision,
                        retry = retries,
                        "Revision conflict, retrying against fresh revision"
                    );
                    update = update.rebased(current.revision);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read a product, preferring a cached copy at or after `min_revision`
    #[instrument(skip(self))]
    pub async fn get_by_id(
        &self,
        id: Uuid,
        min_revision: Option<i64>,
        deadline: Deadline,
    ) -> Result<Product, ProductError> {
        let min_revision = min_revision.unwrap_or(0);

        match deadline.run("cache.get", self.cache.get(id)).await {
            Ok(Ok(Some(entry))) if entry.product.is_at_least(min_revision) => {
                self.metrics.record_cache_request(true);
                debug!(revision = entry.revision, "Serving product from cache");
                return Ok(entry.product);
            }
            Ok(Ok(Some(entry))) => {
                self.metrics.record_cache_request(false);
                debug!(
                    cached = entry.revision,
                    min_revision, "Cached product older than requested"
                );
            }
            Ok(Ok(None)) => self.metrics.record_cache_request(false),
            Ok(Err(e)) => self.cache_failed("get", ProductError::from(e)),
            Err(e) => self.cache_failed("get", e),
        }

        let product = self
            .store_call("get", deadline, self.store.get_by_id(id))
            .await?
            .ok_or(ProductError::NotFound(id))?;

        self.spawn_refill(&product, deadline);
        Ok(product)
    }

    /// Text search straight against the store; never cached
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        pagination: Pagination,
        deadline: Deadline,
    ) -> Result<ProductPage, ProductError> {
        self.store_call("search", deadline, self.store.search(query, pagination))
            .await
    }

    /// Ping the store and the cache concurrently under `deadline`
    pub async fn check_health(&self, deadline: Deadline) -> DependencyHealth {
        let (store, cache) = tokio::join!(
            deadline.run("store.ping", self.store.ping()),
            deadline.run("cache.ping", self.cache.ping()),
        );

        let health = DependencyHealth {
            store: matches!(store, Ok(Ok(()))),
            cache: matches!(cache, Ok(Ok(()))),
        };
        if !health.store || !health.cache {
            warn!(store = health.store, cache = health.cache, "Dependency check failed");
        }
        health
    }

    async fn store_call<T, F>(
        &self,
        operation: &'static str,
        deadline: Deadline,
        call: F,
    ) -> Result<T, ProductError>
    where
        F: Future<Output = Result<T, product_store::StoreError>>,
    {
        let started = Instant::now();
        let result = deadline.run(operation, call).await;
        self.metrics
            .observe_store_call(operation, started.elapsed().as_secs_f64());
        Ok(result??)
    }

    /// Drop the cached snapshot, leaving the committed revision as the floor
    /// for any refill or consumer write still in flight
    async fn invalidate(&self, product: &Product, deadline: Deadline) {
        let id = product.id;
        let invalidation = self.cache.invalidate(id, product.revision, self.cache_ttl);
        match deadline.run("cache.invalidate", invalidation).await {
            Ok(Ok(())) => debug!(product_id = %id, revision = product.revision, "Cache entry invalidated"),
            Ok(Err(e)) => self.cache_failed("invalidate", ProductError::from(e)),
            Err(e) => self.cache_failed("invalidate", e),
        }
    }

    async fn publish(&self, event: ProductEvent, deadline: Deadline) -> MutationStatus {
        let kind = event.kind.as_str();
        let result = match deadline.run("publish", self.publisher.publish(&event)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(ProductError::from(e)),
            Err(e) => Err(e),
        };

        match result {
            Ok(receipt) => {
                self.metrics.record_publish(kind, true);
                debug!(
                    topic = %receipt.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Event acknowledged"
                );
                MutationStatus::Committed
            }
            Err(e) => {
                self.metrics.record_publish(kind, false);
                self.metrics.record_event_pending();
                warn!(
                    product_id = %event.product_id,
                    revision = event.revision(),
                    event_type = kind,
                    error = %e,
                    "Mutation committed but its event is pending; reconciliation gap"
                );
                MutationStatus::CommittedEventPending
            }
        }
    }

    /// Best-effort cache fill that never delays the caller
    fn spawn_refill(&self, product: &Product, deadline: Deadline) {
        let cache = Arc::clone(&self.cache);
        let metrics = self.metrics.clone();
        let entry = CacheEntry::from_product(product);
        let ttl = self.cache_ttl;

        tokio::spawn(async move {
            match deadline.run("cache.set", cache.set(&entry, ttl)).await {
                Ok(Ok(outcome)) => debug!(
                    product_id = %entry.product.id,
                    revision = entry.revision,
                    ?outcome,
                    "Cache refilled"
                ),
                Ok(Err(e)) => {
                    metrics.record_cache_error("set");
                    warn!(product_id = %entry.product.id, error = %e, "Cache refill failed");
                }
                Err(e) => {
                    metrics.record_cache_error("set");
                    warn!(product_id = %entry.product.id, error = %e, "Cache refill timed out");
                }
            }
        });
    }

    fn cache_failed(&self, operation: &str, error: ProductError) {
        self.metrics.record_cache_error(operation);
        warn!(operation, error = %error, "Cache call failed, continuing without cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use domain::{NewProduct, ProductUpdate};
    use messaging::{PublishError, PublishReceipt};
    use mockall::mock;
    use product_cache::{CacheError, SetOutcome};
    use product_store::StoreError;
    use tokio_test::assert_ok;

    mock! {
        pub Store {}

        #[async_trait]
        impl ProductStore for Store {
            async fn create(&self, product: &NewProduct) -> Result<Product, StoreError>;
            async fn update(&self, update: &ProductUpdate) -> Result<Product, StoreError>;
            async fn get_by_id(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
            async fn search(&self, query: &str, pagination: Pagination) -> Result<ProductPage, StoreError>;
            async fn ping(&self) -> Result<(), StoreError>;
        }
    }

    mock! {
        pub Cache {}

        #[async_trait]
        impl ProductCache for Cache {
            async fn get(&self, id: Uuid) -> Result<Option<CacheEntry>, CacheError>;
            async fn set(&self, entry: &CacheEntry, ttl: Duration) -> Result<SetOutcome, CacheError>;
            async fn invalidate(&self, id: Uuid, revision: i64, ttl: Duration) -> Result<(), CacheError>;
            async fn ping(&self) -> Result<(), CacheError>;
        }
    }

    mock! {
        pub Publisher {}

        #[async_trait]
        impl EventPublisher for Publisher {
            async fn publish(&self, event: &ProductEvent) -> Result<PublishReceipt, PublishError>;
        }
    }

    fn product(revision: i64) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            name: "Widget".to_string(),
            description: String::new(),
            price: 10.0,
            image_url: None,
            revision,
            created_at: now,
            updated_at: now,
        }
    }

    fn create_command() -> CreateProductCommand {
        CreateProductCommand {
            name: "Widget".to_string(),
            description: String::new(),
            price: 10.0,
            image_url: None,
        }
    }

    fn receipt() -> PublishReceipt {
        PublishReceipt {
            topic: "product.created".to_string(),
            partition: 0,
            offset: 0,
        }
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn service(store: MockStore, cache: MockCache, publisher: MockPublisher) -> ProductService {
        ProductService::new(
            Arc::new(store),
            Arc::new(cache),
            Arc::new(publisher),
            &ConsistencyConfig::default(),
            ProductMetrics::unregistered(),
        )
    }

    #[tokio::test]
    async fn test_invalid_input_touches_nothing() {
        let mut store = MockStore::new();
        store.expect_create().never();
        let mut cache = MockCache::new();
        cache.expect_invalidate().never();
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().never();

        let mut command = create_command();
        command.price = -1.0;
        let result = service(store, cache, publisher)
            .create(command, deadline())
            .await;

        assert!(matches!(result, Err(ProductError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_store_failure_leaves_cache_and_broker_untouched() {
        let mut store = MockStore::new();
        store
            .expect_create()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("connection refused".to_string())));
        let mut cache = MockCache::new();
        cache.expect_invalidate().never();
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().never();

        let result = service(store, cache, publisher)
            .create(create_command(), deadline())
            .await;

        assert!(matches!(result, Err(ProductError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_publish_failure_is_committed_event_pending() {
        let stored = product(1);
        let id = stored.id;
        let mut store = MockStore::new();
        store
            .expect_create()
            .returning(move |_| Ok(stored.clone()));
        let mut cache = MockCache::new();
        cache
            .expect_invalidate()
            .withf(move |invalidated, revision, _| *invalidated == id && *revision == 1)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().times(1).returning(|event| {
            Err(PublishError::PublishFailed {
                topic: event.kind.as_str().to_string(),
                reason: "all brokers down".to_string(),
            })
        });

        let metrics = ProductMetrics::unregistered();
        let service = ProductService::new(
            Arc::new(store),
            Arc::new(cache),
            Arc::new(publisher),
            &ConsistencyConfig::default(),
            metrics.clone(),
        );

        let outcome = assert_ok!(service.create(create_command(), deadline()).await);
        assert!(outcome.event_pending());
        assert_eq!(outcome.product.id, id);
        assert_eq!(metrics.events_pending(), 1);
        assert_eq!(metrics.mutations("create", "committed_event_pending"), 1);
    }

    #[tokio::test]
    async fn test_cache_outage_never_fails_a_write() {
        let stored = product(1);
        let mut store = MockStore::new();
        store.expect_create().returning(move |_| Ok(stored.clone()));
        let mut cache = MockCache::new();
        cache
            .expect_invalidate()
            .returning(|_, _, _| Err(CacheError::Unavailable("connection reset".to_string())));
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().returning(|_| Ok(receipt()));

        let outcome = assert_ok!(
            service(store, cache, publisher)
                .create(create_command(), deadline())
                .await
        );
        assert_eq!(outcome.status, MutationStatus::Committed);
    }

    #[tokio::test]
    async fn test_conflict_retries_against_fresh_revision() {
        let current = product(3);
        let id = current.id;
        let mut store = MockStore::new();
        store
            .expect_update()
            .withf(|u| u.expected_revision == 1)
            .times(1)
            .returning(move |u| {
                Err(StoreError::Conflict {
                    id: u.id,
                    expected: 1,
                    actual: 3,
                })
            });
        let fresh = current.clone();
        store
            .expect_get_by_id()
            .times(1)
            .returning(move |_| Ok(Some(fresh.clone())));
        store
            .expect_update()
            .withf(|u| u.expected_revision == 3)
            .times(1)
            .returning(move |u| {
                let mut updated = current.clone();
                updated.price = u.attributes.price;
                updated.revision = 4;
                Ok(updated)
            });
        let mut cache = MockCache::new();
        cache
            .expect_invalidate()
            .withf(|_, revision, _| *revision == 4)
            .returning(|_, _, _| Ok(()));
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(|event| event.revision() == 4)
            .returning(|_| Ok(receipt()));

        let command = UpdateProductCommand {
            id,
            name: "Widget".to_string(),
            description: String::new(),
            price: 15.0,
            image_url: None,
            revision: 1,
        };
        let outcome = assert_ok!(
            service(store, cache, publisher)
                .update(command, deadline())
                .await
        );

        assert_eq!(outcome.product.revision, 4);
        assert_eq!(outcome.product.price, 15.0);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_after_budget() {
        let current = product(9);
        let id = current.id;
        let mut store = MockStore::new();
        store.expect_update().times(4).returning(|u| {
            Err(StoreError::Conflict {
                id: u.id,
                expected: u.expected_revision,
                actual: u.expected_revision + 1,
            })
        });
        store
            .expect_get_by_id()
            .times(3)
            .returning(move |_| Ok(Some(current.clone())));
        let mut cache = MockCache::new();
        cache.expect_invalidate().never();
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().never();

        let command = UpdateProductCommand {
            id,
            name: "Widget".to_string(),
            description: String::new(),
            price: 15.0,
            image_url: None,
            revision: 1,
        };
        let result = service(store, cache, publisher)
            .update(command, deadline())
            .await;

        assert!(matches!(result, Err(ProductError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_fresh_cache_hit_skips_store() {
        let cached = product(2);
        let id = cached.id;
        let mut store = MockStore::new();
        store.expect_get_by_id().never();
        let mut cache = MockCache::new();
        cache
            .expect_get()
            .returning(move |_| Ok(Some(CacheEntry::from_product(&cached))));

        let found = assert_ok!(
            service(store, cache, MockPublisher::new())
                .get_by_id(id, Some(2), deadline())
                .await
        );
        assert_eq!(found.revision, 2);
    }

    #[tokio::test]
    async fn test_stale_cache_entry_falls_through_to_store() {
        let stale = product(1);
        let id = stale.id;
        let mut fresh = stale.clone();
        fresh.revision = 2;

        let mut store = MockStore::new();
        store
            .expect_get_by_id()
            .times(1)
            .returning(move |_| Ok(Some(fresh.clone())));
        let mut cache = MockCache::new();
        cache
            .expect_get()
            .returning(move |_| Ok(Some(CacheEntry::from_product(&stale))));
        cache.expect_set().returning(|_, _| Ok(SetOutcome::Stored));

        let found = assert_ok!(
            service(store, cache, MockPublisher::new())
                .get_by_id(id, Some(2), deadline())
                .await
        );
        assert_eq!(found.revision, 2);
    }

    #[tokio::test]
    async fn test_missing_product_is_not_found() {
        let mut store = MockStore::new();
        store.expect_get_by_id().returning(|_| Ok(None));
        let mut cache = MockCache::new();
        cache.expect_get().returning(|_| Ok(None));
        cache.expect_set().never();

        let id = Uuid::new_v4();
        let result = service(store, cache, MockPublisher::new())
            .get_by_id(id, None, deadline())
            .await;
        assert!(matches!(result, Err(ProductError::NotFound(missing)) if missing == id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        struct SlowStore;

        #[async_trait]
        impl ProductStore for SlowStore {
            async fn create(&self, _: &NewProduct) -> Result<Product, StoreError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(StoreError::Unavailable("unreachable".to_string()))
            }
            async fn update(&self, _: &ProductUpdate) -> Result<Product, StoreError> {
                unimplemented!()
            }
            async fn get_by_id(&self, _: Uuid) -> Result<Option<Product>, StoreError> {
                unimplemented!()
            }
            async fn search(&self, _: &str, _: Pagination) -> Result<ProductPage, StoreError> {
                unimplemented!()
            }
            async fn ping(&self) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let mut cache = MockCache::new();
        cache.expect_invalidate().never();
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().never();
        let service = ProductService::new(
            Arc::new(SlowStore),
            Arc::new(cache),
            Arc::new(publisher),
            &ConsistencyConfig::default(),
            ProductMetrics::unregistered(),
        );

        let result = service
            .create(create_command(), Deadline::after(Duration::from_millis(100)))
            .await;
        assert!(matches!(result, Err(ProductError::Timeout("create"))));
    }

    #[tokio::test]
    async fn test_search_bypasses_cache() {
        let mut store = MockStore::new();
        store.expect_search().times(1).returning(|_, pagination| {
            Ok(ProductPage {
                items: vec![],
                total_count: 0,
                offset: pagination.offset,
                limit: pagination.limit,
            })
        });
        let mut cache = MockCache::new();
        cache.expect_get().never();

        let page = assert_ok!(
            service(store, cache, MockPublisher::new())
                .search("widget", Pagination::default(), deadline())
                .await
        );
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_health_reports_each_dependency() {
        let mut store = MockStore::new();
        store.expect_ping().returning(|| Ok(()));
        let mut cache = MockCache::new();
        cache
            .expect_ping()
            .returning(|| Err(CacheError::Unavailable("connection refused".to_string())));

        let health = service(store, cache, MockPublisher::new())
            .check_health(deadline())
            .await;

        assert_eq!(
            health,
            DependencyHealth {
                store: true,
                cache: false
            }
        );
        assert!(health.is_serving());
    }

    #[tokio::test]
    async fn test_store_outage_is_not_serving() {
        let mut store = MockStore::new();
        store
            .expect_ping()
            .returning(|| Err(StoreError::Unavailable("pool closed".to_string())));
        let mut cache = MockCache::new();
        cache.expect_ping().returning(|| Ok(()));

        let health = service(store, cache, MockPublisher::new())
            .check_health(deadline())
            .await;
        assert!(!health.is_serving());
    }
}
