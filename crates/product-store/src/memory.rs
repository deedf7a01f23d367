use super::{ProductStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use domain::{NewProduct, Pagination, Product, ProductPage, ProductUpdate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local product store with the same compare-and-swap semantics as
/// the PostgreSQL implementation. Used by tests and local runs.
#[derive(Default)]
pub struct InMemoryProductStore {
    products: RwLock<HashMap<Uuid, Product>>,
    unavailable: AtomicBool,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.products.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.products.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn create(&self, product: &NewProduct) -> Result<Product, StoreError> {
        self.check_available()?;

        let now = Utc::now();
        let created = Product {
            id: Uuid::new_v4(),
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            image_url: product.image_url.clone(),
            revision: 1,
            created_at: now,
            updated_at: now,
        };

        self.products
            .write()
            .await
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, update: &ProductUpdate) -> Result<Product, StoreError> {
        self.check_available()?;

        let mut products = self.products.write().await;
        let current = products
            .get_mut(&update.id)
            .ok_or(StoreError::NotFound(update.id))?;

        if current.revision != update.expected_revision {
            return Err(StoreError::Conflict {
                id: update.id,
                expected: update.expected_revision,
                actual: current.revision,
            });
        }

        current.name = update.attributes.name.clone();
        current.description = update.attributes.description.clone();
        current.price = update.attributes.price;
        current.image_url = update.attributes.image_url.clone();
        current.revision += 1;
        current.updated_at = Utc::now();

        Ok(current.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        self.check_available()?;
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn search(
        &self,
        query: &str,
        pagination: Pagination,
    ) -> Result<ProductPage, StoreError> {
        self.check_available()?;

        let needle = query.trim().to_lowercase();
        let products = self.products.read().await;

        let mut matches: Vec<&Product> = products
            .values()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
            })
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total_count = matches.len() as i64;
        let items = matches
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();

        Ok(ProductPage {
            items,
            total_count,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
