//! Ledger store contract
//!
//! The ledger only needs keyed reads, upserts, deletes, full listings and a
//! change feed for its two collections. Product upserts are guarded by the
//! record's `version` so a stale read-modify-write is rejected instead of
//! silently overwriting a newer value.

mod memory;
mod snapshot;

pub use memory::MemoryStore;
pub use snapshot::{load_snapshot, save_snapshot, LedgerSnapshot};

use async_trait::async_trait;
use shared::{Order, Product};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Errors raised by a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("version conflict on product {product_id}: expected {expected}, found {found}")]
    VersionConflict {
        product_id: String,
        expected: u64,
        found: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Collections held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Products,
    Orders,
}

/// Change notification published after every successful write
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ProductUpserted(Product),
    ProductDeleted(String),
    OrderUpserted(Order),
    OrderDeleted(Uuid),
}

impl StoreEvent {
    pub fn collection(&self) -> Collection {
        match self {
            StoreEvent::ProductUpserted(_) | StoreEvent::ProductDeleted(_) => Collection::Products,
            StoreEvent::OrderUpserted(_) | StoreEvent::OrderDeleted(_) => Collection::Orders,
        }
    }
}

/// Change feed for one collection
pub struct Subscription {
    collection: Collection,
    receiver: broadcast::Receiver<StoreEvent>,
}

impl Subscription {
    pub fn new(collection: Collection, receiver: broadcast::Receiver<StoreEvent>) -> Self {
        Self {
            collection,
            receiver,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Next event for this collection, or `None` once the store is dropped.
    ///
    /// Events missed because the subscriber lagged are skipped.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.collection() == self.collection => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, collection = ?self.collection, "Subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::next`]
    pub fn try_next(&mut self) -> Option<StoreEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.collection() == self.collection => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Keyed persistence for products and orders
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_product(&self, id: &str) -> Result<Option<Product>, StoreError>;

    /// Write a product.
    ///
    /// When a record with the same id exists, `product.version` must equal the
    /// stored version or the write fails with [`StoreError::VersionConflict`].
    /// Returns the stored record with its version bumped.
    async fn upsert_product(&self, product: Product) -> Result<Product, StoreError>;

    /// Returns whether a record was removed
    async fn delete_product(&self, id: &str) -> Result<bool, StoreError>;

    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn upsert_order(&self, order: Order) -> Result<Order, StoreError>;

    async fn delete_order(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError>;

    fn subscribe(&self, collection: Collection) -> Subscription;
}
