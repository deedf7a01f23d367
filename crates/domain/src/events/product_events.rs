use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregates::product::Product;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "ProductCreated")]
    Created,
    #[serde(rename = "ProductUpdated")]
    Updated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "ProductCreated",
            EventKind::Updated => "ProductUpdated",
        }
    }
}

/// Position of a delivered event in the log, assigned by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSequence {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Immutable record of a product mutation.
///
/// Serialized as a flat JSON record: the snapshot's fields sit next to the
/// event header, and the committed revision is the snapshot's own. `sequence`
/// is never serialized: it is filled in from the broker on consumption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductEvent {
    pub event_id: Uuid,
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    pub product_id: Uuid,
    #[serde(flatten)]
    pub product: Product,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip)]
    pub sequence: Option<EventSequence>,
}

impl ProductEvent {
    pub fn created(product: &Product) -> Self {
        Self::new(EventKind::Created, product)
    }

    pub fn updated(product: &Product) -> Self {
        Self::new(EventKind::Updated, product)
    }

    fn new(kind: EventKind, product: &Product) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            product_id: product.id,
            product: product.clone(),
            occurred_at: Utc::now(),
            sequence: None,
        }
    }

    /// Revision the mutation committed
    pub fn revision(&self) -> i64 {
        self.product.revision
    }

    pub fn with_sequence(mut self, sequence: EventSequence) -> Self {
        self.sequence = Some(sequence);
        self
    }
}
