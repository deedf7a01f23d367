pub mod create_product;
pub mod error;
pub mod get_product;
pub mod health;
pub mod search_products;
pub mod update_product;
