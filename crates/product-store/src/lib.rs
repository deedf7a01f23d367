pub mod memory;
pub mod postgres_product_store;

pub use memory::InMemoryProductStore;
pub use postgres_product_store::PostgresProductStore;

use async_trait::async_trait;
use domain::{NewProduct, Pagination, Product, ProductPage, ProductUpdate};
use thiserror::Error;
use uuid::Uuid;

/// Durable source of truth for products.
///
/// Every write is atomic for a single product; there are no cross-document
/// transactions.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert a new product. The store assigns the identity and revision 1.
    async fn create(&self, product: &NewProduct) -> Result<Product, StoreError>;

    /// Replace a product's attributes if its revision still equals
    /// `update.expected_revision`; the stored revision is then incremented.
    async fn update(&self, update: &ProductUpdate) -> Result<Product, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Product>, StoreError>;

    /// Case-insensitive text match on name and description, newest first
    async fn search(&self, query: &str, pagination: Pagination)
        -> Result<ProductPage, StoreError>;

    /// Cheap round trip used by health checks
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Product not found: {0}")]
    NotFound(Uuid),

    #[error("Revision conflict on product {id}: expected {expected}, got {actual}")]
    Conflict { id: Uuid, expected: i64, actual: i64 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Escape LIKE wildcards so user input is matched literally
pub(crate) fn like_pattern(query: &str) -> String {
    let escaped = query
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
