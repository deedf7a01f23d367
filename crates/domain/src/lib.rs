pub mod aggregates;
pub mod commands;
pub mod errors;
pub mod events;

pub use aggregates::product::{NewProduct, Pagination, Product, ProductPage, ProductUpdate};
pub use commands::product_commands::{CreateProductCommand, UpdateProductCommand};
pub use errors::DomainError;
pub use events::product_events::{EventKind, EventSequence, ProductEvent};
