//! Drift repair: recompute stock from import history and order history

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use shared::{authoritative_total_imported, Order, Product};

use super::adjuster::StockAdjuster;
use super::orders::LineFailure;
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

/// Stored vs. reconciled figures for one product
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DriftEntry {
    pub product_id: String,
    pub name: String,
    pub stored_stock: i64,
    pub corrected_stock: i64,
    pub stored_total_imported: i64,
    pub authoritative_total_imported: i64,
    pub units_sold: i64,
}

impl DriftEntry {
    fn for_product(product: &Product, units_sold: i64) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            stored_stock: product.stock_quantity,
            corrected_stock: corrected_stock(product, units_sold),
            stored_total_imported: product.total_imported,
            authoritative_total_imported: authoritative_total_imported(product),
            units_sold,
        }
    }

    pub fn has_drift(&self) -> bool {
        self.stored_stock != self.corrected_stock
            || self.stored_total_imported != self.authoritative_total_imported
    }
}

/// Result of a reconciliation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub scanned_products: usize,
    pub updated_count: usize,
    pub updates: Vec<DriftEntry>,
    pub failures: Vec<LineFailure>,
}

/// Units sold per product across every order that is not cancelled
pub fn units_sold_by_product(orders: &[Order]) -> HashMap<String, i64> {
    let mut sold = HashMap::new();
    for order in orders.iter().filter(|o| !o.status.is_cancelled()) {
        for item in &order.items {
            if let Some(product_id) = &item.product_id {
                *sold.entry(product_id.clone()).or_insert(0) += item.quantity;
            }
        }
    }
    sold
}

/// `max(0, authoritative_total_imported - units_sold)`
pub fn corrected_stock(product: &Product, units_sold: i64) -> i64 {
    (authoritative_total_imported(product) - units_sold).max(0)
}

/// The repaired record, or `None` when the product already agrees with history
pub fn reconcile_product(product: &Product, units_sold: i64) -> Option<Product> {
    let entry = DriftEntry::for_product(product, units_sold);
    if !entry.has_drift() {
        return None;
    }

    let mut repaired = product.clone();
    repaired.stock_quantity = entry.corrected_stock;
    repaired.total_imported = entry.authoritative_total_imported;
    if repaired.history_is_authoritative() {
        repaired.last_import_date = repaired.latest_import_date();
    }
    Some(repaired)
}

/// Recomputes stock for every product from the order history
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    adjuster: StockAdjuster,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn LedgerStore>, adjuster: StockAdjuster) -> Self {
        Self { store, adjuster }
    }

    /// Overwrite stored stock with `total imported - units sold` wherever they differ.
    ///
    /// Each product is re-read under its lock right before the overwrite, so
    /// an adjustment landing mid-scan is not lost. Running twice in a row
    /// changes nothing the second time.
    #[tracing::instrument(skip(self))]
    pub async fn recalculate_inventory_from_orders(&self) -> LedgerResult<ReconciliationReport> {
        let orders = self.store.list_orders().await?;
        let sold = units_sold_by_product(&orders);

        let mut products = self.store.list_products().await?;
        products.sort_by(|a, b| a.id.cmp(&b.id));

        let mut report = ReconciliationReport {
            scanned_products: products.len(),
            ..Default::default()
        };

        for product in products {
            let units_sold = sold.get(&product.id).copied().unwrap_or(0);
            let result = self
                .adjuster
                .update_with(&product.id, |current| Ok(reconcile_product(current, units_sold)))
                .await;

            match result {
                Ok(write) if write.changed() => {
                    tracing::debug!(
                        product_id = %product.id,
                        from = write.before.stock_quantity,
                        to = write.after.stock_quantity,
                        "Stock reconciled"
                    );
                    report.updates.push(DriftEntry::for_product(&write.before, units_sold));
                }
                Ok(_) => {}
                // Deleted between the scan and the write
                Err(LedgerError::NotFound { .. }) => {}
                Err(err) => {
                    tracing::warn!(product_id = %product.id, error = %err, "Reconciliation failed for product");
                    report.failures.push(LineFailure {
                        order_id: None,
                        product_id: Some(product.id.clone()),
                        error: (&err).into(),
                    });
                }
            }
        }

        report.updated_count = report.updates.len();
        tracing::info!(
            scanned = report.scanned_products,
            updated = report.updated_count,
            failed = report.failures.len(),
            "Inventory recalculated from orders"
        );
        Ok(report)
    }

    /// Read-only drift report; nothing is written
    pub async fn audit_inventory(&self) -> LedgerResult<Vec<DriftEntry>> {
        let orders = self.store.list_orders().await?;
        let sold = units_sold_by_product(&orders);

        let mut entries: Vec<DriftEntry> = self
            .store
            .list_products()
            .await?
            .iter()
            .map(|p| DriftEntry::for_product(p, sold.get(&p.id).copied().unwrap_or(0)))
            .filter(DriftEntry::has_drift)
            .collect();
        entries.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use shared::{ImportRecord, OrderItem, OrderStatus};

    fn product(stock: i64, total: i64, history: &[i64]) -> Product {
        let now = Utc::now();
        Product {
            id: "p".into(),
            name: "P".into(),
            selling_price: Decimal::ONE,
            import_price: None,
            stock_quantity: stock,
            total_imported: total,
            import_history: history
                .iter()
                .map(|q| ImportRecord::new(*q, None, None, now))
                .collect(),
            last_import_date: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn line(product_id: &str, quantity: i64) -> OrderItem {
        let mut item = OrderItem::ad_hoc(product_id, quantity, Decimal::ONE);
        item.product_id = Some(product_id.to_string());
        item
    }

    #[test]
    fn test_cancelled_orders_are_not_sold() {
        let live = Order::new(None, vec![line("p", 2), line("q", 1)]);
        let mut cancelled = Order::new(None, vec![line("p", 5)]);
        cancelled.status = OrderStatus::Cancelled;
        let mut delivered = Order::new(None, vec![line("p", 1)]);
        delivered.status = OrderStatus::Delivered;

        let sold = units_sold_by_product(&[live, cancelled, delivered]);
        assert_eq!(sold["p"], 3);
        assert_eq!(sold["q"], 1);
    }

    #[test]
    fn test_corrected_stock_floors_at_zero() {
        assert_eq!(corrected_stock(&product(0, 10, &[]), 4), 6);
        assert_eq!(corrected_stock(&product(0, 10, &[]), 40), 0);
        assert_eq!(corrected_stock(&product(0, 99, &[3, 4]), 2), 5);
    }

    #[test]
    fn test_reconcile_product_is_idempotent() {
        let drifted = product(9, 10, &[]);
        let repaired = reconcile_product(&drifted, 4).unwrap();
        assert_eq!(repaired.stock_quantity, 6);
        assert!(reconcile_product(&repaired, 4).is_none());
    }

    #[test]
    fn test_reconcile_aligns_total_with_history() {
        let drifted = product(5, 99, &[6, 4]);
        let repaired = reconcile_product(&drifted, 5).unwrap();
        assert_eq!(repaired.total_imported, 10);
        assert_eq!(repaired.stock_quantity, 5);
    }
}
