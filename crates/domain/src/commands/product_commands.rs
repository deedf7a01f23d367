use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::aggregates::product::{NewProduct, ProductUpdate};

/// Command to create a new product
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductCommand {
    #[validate(length(min = 1, max = 250, message = "Name must be 1-250 characters"))]
    pub name: String,

    #[validate(length(max = 5000, message = "Description cannot exceed 5000 characters"))]
    #[serde(default)]
    pub description: String,

    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: f64,

    #[validate(url(message = "Image URL must be a valid URL"))]
    #[serde(default)]
    pub image_url: Option<String>,
}

impl CreateProductCommand {
    pub fn into_new_product(self) -> NewProduct {
        NewProduct {
            name: self.name,
            description: self.description,
            price: self.price,
            image_url: self.image_url,
        }
    }
}

/// Command to replace a product's attributes.
///
/// `revision` is the revision the caller last read; the store rejects the
/// write if the product has moved on since.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateProductCommand {
    pub id: Uuid,

    #[validate(length(min = 1, max = 250, message = "Name must be 1-250 characters"))]
    pub name: String,

    #[validate(length(max = 5000, message = "Description cannot exceed 5000 characters"))]
    #[serde(default)]
    pub description: String,

    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: f64,

    #[validate(url(message = "Image URL must be a valid URL"))]
    #[serde(default)]
    pub image_url: Option<String>,

    #[validate(range(min = 1, message = "Revision must be at least 1"))]
    pub revision: i64,
}

impl UpdateProductCommand {
    pub fn into_update(self) -> ProductUpdate {
        ProductUpdate {
            id: self.id,
            attributes: NewProduct {
                name: self.name,
                description: self.description,
                price: self.price,
                image_url: self.image_url,
            },
            expected_revision: self.revision,
        }
    }
}
