pub mod cache_sync;
pub mod deadline;
pub mod errors;
pub mod service;

pub use cache_sync::CacheSyncHandler;
pub use deadline::Deadline;
pub use errors::ProductError;
pub use service::{DependencyHealth, MutationOutcome, MutationStatus, ProductService};
