//! Propagate product name and price edits into pending orders

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use shared::{Order, OrderStatus, Product};
use uuid::Uuid;

use super::locks::OrderLocks;
use super::orders::LineFailure;
use crate::error::LedgerResult;
use crate::store::LedgerStore;

/// Result of a pending-order sync
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub updated_count: usize,
    pub updated_orders: Vec<Uuid>,
    pub failures: Vec<LineFailure>,
}

/// `order` with every line of `product` carrying its current name and price.
///
/// Returns `None` when the order is not pending or nothing would change.
pub fn sync_order_lines(order: &Order, product: &Product) -> Option<Order> {
    if order.status != OrderStatus::Pending {
        return None;
    }

    let mut synced = order.clone();
    let mut changed = false;
    for item in synced
        .items
        .iter_mut()
        .filter(|i| i.product_id.as_deref() == Some(product.id.as_str()))
    {
        if item.name != product.name || item.price != product.selling_price {
            item.name = product.name.clone();
            item.price = product.selling_price;
            changed = true;
        }
    }

    if !changed {
        return None;
    }
    synced.recompute_total();
    Some(synced)
}

/// Rewrites outstanding orders after a catalog edit.
///
/// Never runs on its own: the caller decides, usually after asking the
/// operator, since it rewrites figures on open orders.
#[derive(Clone)]
pub struct PendingOrderSync {
    store: Arc<dyn LedgerStore>,
    order_locks: Arc<OrderLocks>,
}

impl PendingOrderSync {
    pub fn new(store: Arc<dyn LedgerStore>, order_locks: Arc<OrderLocks>) -> Self {
        Self { store, order_locks }
    }

    /// Copy `product`'s name and selling price into every PENDING order line
    /// that references it. Orders past PENDING keep their snapshot.
    #[tracing::instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn sync_product_to_pending_orders(&self, product: &Product) -> LedgerResult<SyncReport> {
        let mut report = SyncReport::default();

        for listed in self.store.list_orders().await? {
            if sync_order_lines(&listed, product).is_none() {
                continue;
            }

            let order_id = listed.id;
            match self.sync_one(order_id, product).await {
                Ok(true) => report.updated_orders.push(order_id),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(%order_id, error = %err, "Pending order not synced");
                    report.failures.push(LineFailure {
                        order_id: Some(order_id),
                        product_id: Some(product.id.clone()),
                        error: (&err).into(),
                    });
                }
            }
        }

        report.updated_orders.sort();
        report.updated_count = report.updated_orders.len();
        tracing::info!(updated = report.updated_count, "Pending orders synced");
        Ok(report)
    }

    /// Re-read one order under its lock and rewrite it if it still needs it
    async fn sync_one(&self, order_id: Uuid, product: &Product) -> LedgerResult<bool> {
        let _guard = self.order_locks.lock(&order_id).await;
        let Some(current) = self.store.get_order(order_id).await? else {
            return Ok(false);
        };
        let Some(mut synced) = sync_order_lines(&current, product) else {
            return Ok(false);
        };
        synced.updated_at = Utc::now();
        self.store.upsert_order(synced).await?;
        Ok(true)
    }
}
