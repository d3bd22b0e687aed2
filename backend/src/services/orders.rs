//! Order-stock coupling: keeps stock consistent with the order lifecycle

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use shared::{AdjustmentMeta, Order, OrderStatus};
use uuid::Uuid;
use validator::Validate;

use super::adjuster::{StockAdjuster, StockChange};
use super::locks::OrderLocks;
use crate::config::{LedgerConfig, OrderEditPolicy};
use crate::error::{ErrorDetail, LedgerError, LedgerResult};
use crate::store::LedgerStore;

/// A line or product that could not be processed in a multi-step operation
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LineFailure {
    pub order_id: Option<Uuid>,
    pub product_id: Option<String>,
    pub error: ErrorDetail,
}

impl LineFailure {
    fn product(order_id: Option<Uuid>, product_id: &str, err: &LedgerError) -> Self {
        Self {
            order_id,
            product_id: Some(product_id.to_string()),
            error: err.into(),
        }
    }

    fn order(order_id: Uuid, err: &LedgerError) -> Self {
        Self {
            order_id: Some(order_id),
            product_id: None,
            error: err.into(),
        }
    }
}

/// Outcome of an order edit or status change
#[derive(Debug, Clone, Serialize)]
pub struct OrderStockReport {
    pub order: Order,
    pub adjustments: Vec<StockChange>,
    pub failures: Vec<LineFailure>,
}

/// Outcome of deleting one order
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
    pub order_id: Uuid,
    pub restored: Vec<StockChange>,
    pub failures: Vec<LineFailure>,
}

/// Outcome of deleting several orders
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkDeletionReport {
    pub deleted: Vec<Uuid>,
    /// One entry per product, carrying the summed quantity of all deleted orders
    pub restored: Vec<StockChange>,
    pub failures: Vec<LineFailure>,
}

/// Hooks that deduct and restore stock as orders are created, edited and deleted.
///
/// Each operation holds the order's lock from the first read until its stock
/// effects are applied, so two operations on one order never act on the same
/// stale status.
#[derive(Clone)]
pub struct OrderStockCoupler {
    store: Arc<dyn LedgerStore>,
    adjuster: StockAdjuster,
    order_locks: Arc<OrderLocks>,
    config: LedgerConfig,
}

impl OrderStockCoupler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        adjuster: StockAdjuster,
        order_locks: Arc<OrderLocks>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            adjuster,
            order_locks,
            config,
        }
    }

    /// Whether an order in `status` currently has its quantities deducted
    pub fn holds_stock(&self, status: OrderStatus) -> bool {
        !(status.is_cancelled() && self.config.cancellation_restores_stock)
    }

    fn holdings(&self, order: &Order) -> HashMap<String, i64> {
        if self.holds_stock(order.status) {
            order.quantities_by_product()
        } else {
            HashMap::new()
        }
    }

    /// Persist a new order and deduct stock for every linked line.
    ///
    /// Every referenced product must exist and the id must be unused. If a
    /// deduction fails, the deductions already applied are reversed and the
    /// order is removed.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn create_order_and_deduct_stock(&self, mut order: Order) -> LedgerResult<Order> {
        validate_order(&order)?;
        let _guard = self.order_locks.lock(&order.id).await;
        if self.store.get_order(order.id).await?.is_some() {
            return Err(LedgerError::validation("id", "an order with this id already exists"));
        }
        self.ensure_products_exist(order.items.iter().filter_map(|i| i.product_id.as_deref()))
            .await?;

        let now = Utc::now();
        order.recompute_total();
        order.created_at = now;
        order.updated_at = now;

        let holdings = sorted(self.holdings(&order));
        let order = self.store.upsert_order(order).await?;

        let mut applied: Vec<StockChange> = Vec::with_capacity(holdings.len());
        for (product_id, quantity) in &holdings {
            let meta = AdjustmentMeta::sale(format!("order {}", order.id));
            match self.adjuster.adjust_stock_change(product_id, -quantity, meta).await {
                Ok(change) => applied.push(change),
                Err(err) => {
                    tracing::warn!(order_id = %order.id, product_id = %product_id, error = %err, "Deduction failed, rolling back order");
                    self.roll_back_creation(&order, &applied).await;
                    return Err(err);
                }
            }
        }

        tracing::info!(order_id = %order.id, lines = order.items.len(), "Order created");
        Ok(order)
    }

    async fn roll_back_creation(&self, order: &Order, applied: &[StockChange]) {
        for change in applied.iter().filter(|c| c.applied < 0) {
            let meta = AdjustmentMeta::restock(format!("rollback of order {}", order.id));
            if let Err(err) = self
                .adjuster
                .adjust_stock(&change.product_id, -change.applied, meta)
                .await
            {
                tracing::error!(product_id = %change.product_id, error = %err, "Rollback restock failed");
            }
        }
        if let Err(err) = self.store.delete_order(order.id).await {
            tracing::error!(order_id = %order.id, error = %err, "Rollback delete failed");
        }
    }

    /// Replace an order's items (and batch) with those of `order`.
    ///
    /// Under [`OrderEditPolicy::Diff`] stock moves by the per-product net
    /// difference between old and new lines. Status changes go through
    /// [`OrderStockCoupler::set_order_status`].
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn update_order(&self, mut order: Order) -> LedgerResult<OrderStockReport> {
        validate_order(&order)?;
        let _guard = self.order_locks.lock(&order.id).await;
        let existing = self
            .store
            .get_order(order.id)
            .await?
            .ok_or_else(|| LedgerError::order_not_found(order.id))?;

        if existing.status != order.status {
            return Err(LedgerError::validation(
                "status",
                "order status is changed with set_order_status",
            ));
        }

        // Lines that already pointed at a since-removed product may keep doing so
        let known: HashSet<&str> = existing
            .items
            .iter()
            .filter_map(|i| i.product_id.as_deref())
            .collect();
        self.ensure_products_exist(
            order
                .items
                .iter()
                .filter_map(|i| i.product_id.as_deref())
                .filter(|id| !known.contains(id)),
        )
        .await?;

        order.created_at = existing.created_at;
        order.updated_at = Utc::now();
        order.recompute_total();
        let order = self.store.upsert_order(order).await?;

        let (adjustments, failures) = match self.config.order_edit_policy {
            OrderEditPolicy::Diff => {
                self.apply_holding_diff(order.id, &self.holdings(&existing), &self.holdings(&order), "edit")
                    .await
            }
            OrderEditPolicy::StockNeutral => (Vec::new(), Vec::new()),
        };

        Ok(OrderStockReport {
            order,
            adjustments,
            failures,
        })
    }

    /// Change an order's status.
    ///
    /// With `cancellation_restores_stock`, entering CANCELLED restores the
    /// order's quantities and leaving it deducts them again.
    #[tracing::instrument(skip(self))]
    pub async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) -> LedgerResult<OrderStockReport> {
        let _guard = self.order_locks.lock(&order_id).await;
        let existing = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| LedgerError::order_not_found(order_id))?;

        if existing.status == status {
            return Ok(OrderStockReport {
                order: existing,
                adjustments: Vec::new(),
                failures: Vec::new(),
            });
        }

        let mut order = existing.clone();
        order.status = status;
        order.updated_at = Utc::now();
        let order = self.store.upsert_order(order).await?;

        let (adjustments, failures) = self
            .apply_holding_diff(order.id, &self.holdings(&existing), &self.holdings(&order), status.as_str())
            .await;

        tracing::info!(%order_id, from = existing.status.as_str(), to = status.as_str(), "Order status changed");
        Ok(OrderStockReport {
            order,
            adjustments,
            failures,
        })
    }

    /// Delete an order and give its quantities back to stock.
    ///
    /// A line whose product is gone is reported in the returned failures; it
    /// never blocks the delete.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order_and_restore_stock(&self, order_id: Uuid) -> LedgerResult<DeletionReport> {
        let guard = self.order_locks.lock(&order_id).await;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| LedgerError::order_not_found(order_id))?;

        self.store.delete_order(order_id).await?;

        let mut restored = Vec::new();
        let mut failures = Vec::new();
        for (product_id, quantity) in sorted(self.holdings(&order)) {
            let meta = AdjustmentMeta::restock(format!("restored from deleted order {}", order_id));
            match self.adjuster.adjust_stock_change(&product_id, quantity, meta).await {
                Ok(change) => {
                    log_capped_restore(&change);
                    restored.push(change);
                }
                Err(err) => {
                    tracing::warn!(%order_id, product_id = %product_id, error = %err, "Stock not restored for deleted order line");
                    failures.push(LineFailure::product(Some(order_id), &product_id, &err));
                }
            }
        }

        drop(guard);
        self.order_locks.forget(&order_id);
        tracing::info!(%order_id, restored = restored.len(), failed = failures.len(), "Order deleted");
        Ok(DeletionReport {
            order_id,
            restored,
            failures,
        })
    }

    /// Delete several orders, restoring stock with one net adjustment per product
    #[tracing::instrument(skip(self, order_ids), fields(count = order_ids.len()))]
    pub async fn bulk_delete_orders_and_restore_stock(&self, order_ids: &[Uuid]) -> LedgerResult<BulkDeletionReport> {
        let mut report = BulkDeletionReport::default();
        let mut totals: HashMap<String, i64> = HashMap::new();
        let mut seen = HashSet::new();

        for &order_id in order_ids {
            if !seen.insert(order_id) {
                continue;
            }

            let guard = self.order_locks.lock(&order_id).await;
            let order = match self.store.get_order(order_id).await {
                Ok(Some(order)) => order,
                Ok(None) => {
                    report
                        .failures
                        .push(LineFailure::order(order_id, &LedgerError::order_not_found(order_id)));
                    continue;
                }
                Err(err) => {
                    report.failures.push(LineFailure::order(order_id, &LedgerError::from(err)));
                    continue;
                }
            };

            if let Err(err) = self.store.delete_order(order_id).await {
                report.failures.push(LineFailure::order(order_id, &LedgerError::from(err)));
                continue;
            }

            drop(guard);
            self.order_locks.forget(&order_id);

            for (product_id, quantity) in self.holdings(&order) {
                *totals.entry(product_id).or_insert(0) += quantity;
            }
            report.deleted.push(order_id);
        }

        for (product_id, quantity) in sorted(totals) {
            let meta = AdjustmentMeta::restock(format!(
                "restored from {} deleted orders",
                report.deleted.len()
            ));
            match self.adjuster.adjust_stock_change(&product_id, quantity, meta).await {
                Ok(change) => {
                    log_capped_restore(&change);
                    report.restored.push(change);
                }
                Err(err) => {
                    tracing::warn!(product_id = %product_id, quantity, error = %err, "Bulk restore failed for product");
                    report.failures.push(LineFailure::product(None, &product_id, &err));
                }
            }
        }

        tracing::info!(
            deleted = report.deleted.len(),
            products = report.restored.len(),
            failed = report.failures.len(),
            "Bulk order deletion finished"
        );
        Ok(report)
    }

    async fn apply_holding_diff(
        &self,
        order_id: Uuid,
        old: &HashMap<String, i64>,
        new: &HashMap<String, i64>,
        reason: &str,
    ) -> (Vec<StockChange>, Vec<LineFailure>) {
        let mut adjustments = Vec::new();
        let mut failures = Vec::new();

        for (product_id, delta) in holding_diff(old, new) {
            let meta = if delta < 0 {
                AdjustmentMeta::sale(format!("order {} {}", order_id, reason))
            } else {
                AdjustmentMeta::restock(format!("order {} {}", order_id, reason))
            };
            match self.adjuster.adjust_stock_change(&product_id, delta, meta).await {
                Ok(change) => {
                    log_capped_restore(&change);
                    adjustments.push(change);
                }
                Err(err) => {
                    tracing::warn!(%order_id, product_id = %product_id, delta, error = %err, "Order stock adjustment failed");
                    failures.push(LineFailure::product(Some(order_id), &product_id, &err));
                }
            }
        }

        (adjustments, failures)
    }

    async fn ensure_products_exist<'a, I>(&self, product_ids: I) -> LedgerResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: HashSet<&str> = product_ids.into_iter().collect();
        for id in ids {
            if self.store.get_product(id).await?.is_none() {
                return Err(LedgerError::product_not_found(id));
            }
        }
        Ok(())
    }
}

fn log_capped_restore(change: &StockChange) {
    if change.delta > 0 && change.applied < change.delta {
        tracing::warn!(
            product_id = %change.product_id,
            requested = change.delta,
            applied = change.applied,
            "Restore capped at total imported"
        );
    }
}

/// Stock delta per product when holdings change from `old` to `new`.
///
/// Positive values give stock back, negative values take it; unchanged
/// products are omitted. Sorted by product id.
pub fn holding_diff(old: &HashMap<String, i64>, new: &HashMap<String, i64>) -> Vec<(String, i64)> {
    let mut deltas: BTreeMap<String, i64> = BTreeMap::new();
    for (product_id, quantity) in old {
        *deltas.entry(product_id.clone()).or_insert(0) += quantity;
    }
    for (product_id, quantity) in new {
        *deltas.entry(product_id.clone()).or_insert(0) -= quantity;
    }
    deltas.into_iter().filter(|(_, delta)| *delta != 0).collect()
}

fn sorted(holdings: HashMap<String, i64>) -> Vec<(String, i64)> {
    let mut holdings: Vec<(String, i64)> = holdings.into_iter().collect();
    holdings.sort();
    holdings
}

fn validate_order(order: &Order) -> LedgerResult<()> {
    if order.items.is_empty() {
        return Err(LedgerError::validation("items", "an order needs at least one item"));
    }
    order.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, i64)]) -> HashMap<String, i64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_holding_diff_quantity_change() {
        let diff = holding_diff(&map(&[("a", 5)]), &map(&[("a", 2)]));
        assert_eq!(diff, vec![("a".to_string(), 3)]);
    }

    #[test]
    fn test_holding_diff_relinked_product() {
        let diff = holding_diff(&map(&[("a", 2)]), &map(&[("b", 2)]));
        assert_eq!(diff, vec![("a".to_string(), 2), ("b".to_string(), -2)]);
    }

    #[test]
    fn test_holding_diff_unchanged_is_empty() {
        assert!(holding_diff(&map(&[("a", 2)]), &map(&[("a", 2)])).is_empty());
    }
}
