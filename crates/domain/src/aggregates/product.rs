use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// A product as stored in the document store.
///
/// `id` is assigned by the store on creation and never changes. `revision`
/// starts at 1 and grows by exactly one on every successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub image_url: Option<String>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Attributes of this product, detached from identity and revision
    pub fn attributes(&self) -> NewProduct {
        NewProduct {
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
            image_url: self.image_url.clone(),
        }
    }

    /// True if `self` reflects a state at or after `revision`
    pub fn is_at_least(&self, revision: i64) -> bool {
        self.revision >= revision
    }
}

/// Mutable attribute set of a product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub image_url: Option<String>,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, description: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            price,
            image_url: None,
        }
    }
}

/// Full replacement of a product's attributes, conditional on `expected_revision`
#[derive(Debug, Clone, PartialEq)]
pub struct ProductUpdate {
    pub id: Uuid,
    pub attributes: NewProduct,
    pub expected_revision: i64,
}

impl ProductUpdate {
    pub fn new(id: Uuid, attributes: NewProduct, expected_revision: i64) -> Self {
        Self {
            id,
            attributes,
            expected_revision,
        }
    }

    /// Same update re-targeted at a freshly read revision
    pub fn rebased(&self, revision: i64) -> Self {
        Self {
            expected_revision: revision,
            ..self.clone()
        }
    }
}

/// Offset/limit pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(offset: i64, limit: i64) -> Result<Self, DomainError> {
        if offset < 0 {
            return Err(DomainError::InvalidPagination(
                "Offset must be >= 0".to_string(),
            ));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(DomainError::InvalidPagination(format!(
                "Limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(Self { offset, limit })
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// One page of search results plus the total number of matches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductPage {
    pub items: Vec<Product>,
    pub total_count: i64,
    pub offset: i64,
    pub limit: i64,
}

impl ProductPage {
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as i64) < self.total_count
    }
}
