use domain::DomainError;
use messaging::PublishError;
use product_cache::CacheError;
use product_store::StoreError;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

/// Errors surfaced by the product orchestrator
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Product not found: {0}")]
    NotFound(Uuid),

    #[error("Revision conflict on product {id}: expected {expected}, current {actual}")]
    Conflict { id: Uuid, expected: i64, actual: i64 },

    #[error("Deadline exceeded during {0}")]
    Timeout(&'static str),

    #[error("Event publish failed: {0}")]
    PublishFailed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl From<StoreError> for ProductError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ProductError::NotFound(id),
            StoreError::Conflict {
                id,
                expected,
                actual,
            } => ProductError::Conflict {
                id,
                expected,
                actual,
            },
            StoreError::Unavailable(msg) | StoreError::Database(msg) => {
                ProductError::StoreUnavailable(msg)
            }
        }
    }
}

impl From<CacheError> for ProductError {
    fn from(err: CacheError) -> Self {
        ProductError::CacheUnavailable(err.to_string())
    }
}

impl From<PublishError> for ProductError {
    fn from(err: PublishError) -> Self {
        ProductError::PublishFailed(err.to_string())
    }
}

impl From<DomainError> for ProductError {
    fn from(err: DomainError) -> Self {
        ProductError::ValidationFailed(err.to_string())
    }
}

impl From<ValidationErrors> for ProductError {
    fn from(errors: ValidationErrors) -> Self {
        ProductError::ValidationFailed(errors.to_string())
    }
}
