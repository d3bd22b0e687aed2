//! In-memory ledger store with change notifications

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use shared::{Order, Product};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::{Collection, LedgerSnapshot, LedgerStore, StoreError, StoreEvent, Subscription};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Process-local store, also the backing map of the JSON snapshot store
pub struct MemoryStore {
    products: RwLock<HashMap<String, Product>>,
    orders: RwLock<HashMap<Uuid, Order>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            products: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Seed a store from a snapshot without publishing events
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let products = snapshot
            .products
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let orders = snapshot.orders.into_iter().map(|o| (o.id, o)).collect();
        Self {
            products: RwLock::new(products),
            orders: RwLock::new(orders),
            events,
        }
    }

    /// Copy of every record, sorted by id
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let mut products: Vec<Product> = self.products.read().await.values().cloned().collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        LedgerSnapshot { products, orders }
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        Ok(self.products.read().await.get(id).cloned())
    }

    async fn upsert_product(&self, mut product: Product) -> Result<Product, StoreError> {
        let mut products = self.products.write().await;
        if let Some(existing) = products.get(&product.id) {
            if existing.version != product.version {
                return Err(StoreError::VersionConflict {
                    product_id: product.id.clone(),
                    expected: product.version,
                    found: existing.version,
                });
            }
        }
        product.version += 1;
        product.updated_at = Utc::now();
        products.insert(product.id.clone(), product.clone());
        drop(products);

        self.publish(StoreEvent::ProductUpserted(product.clone()));
        Ok(product)
    }

    async fn delete_product(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.products.write().await.remove(id).is_some();
        if removed {
            self.publish(StoreEvent::ProductDeleted(id.to_string()));
        }
        Ok(removed)
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.products.read().await.values().cloned().collect())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn upsert_order(&self, order: Order) -> Result<Order, StoreError> {
        self.orders.write().await.insert(order.id, order.clone());
        self.publish(StoreEvent::OrderUpserted(order.clone()));
        Ok(order)
    }

    async fn delete_order(&self, id: Uuid) -> Result<bool, StoreError> {
        let removed = self.orders.write().await.remove(&id).is_some();
        if removed {
            self.publish(StoreEvent::OrderDeleted(id));
        }
        Ok(removed)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        Ok(self.orders.read().await.values().cloned().collect())
    }

    fn subscribe(&self, collection: Collection) -> Subscription {
        Subscription::new(collection, self.events.subscribe())
    }
}
