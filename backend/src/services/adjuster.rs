//! Atomic stock adjustment, the single mutation path for stock counters

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    authoritative_total_imported, AdjustmentMeta, ImportRecord, Product, StockMovement,
};

use super::locks::ProductLocks;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, StoreError};

/// Net stock change applied to one product
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: String,
    /// Requested delta
    pub delta: i64,
    /// Delta actually applied once the floor at zero is taken into account
    pub applied: i64,
    pub stock_after: i64,
}

/// A product record as read and as written by one read-modify-write cycle
#[derive(Debug, Clone)]
pub struct ProductWrite {
    pub before: Product,
    pub after: Product,
}

impl ProductWrite {
    pub fn changed(&self) -> bool {
        self.before.version != self.after.version
    }
}

/// Serializes read-modify-write cycles per product and retries on version conflicts
#[derive(Clone)]
pub struct StockAdjuster {
    store: Arc<dyn LedgerStore>,
    locks: Arc<ProductLocks>,
    max_retries: u32,
}

impl StockAdjuster {
    pub fn new(store: Arc<dyn LedgerStore>, locks: Arc<ProductLocks>, max_retries: u32) -> Self {
        Self {
            store,
            locks,
            max_retries: max_retries.max(1),
        }
    }

    pub fn locks(&self) -> &Arc<ProductLocks> {
        &self.locks
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Change a product's stock by a signed delta.
    ///
    /// Positive `Import` deltas append an import record and raise
    /// `total_imported`; `Sale` and `Restock` movements only move
    /// `stock_quantity`. The result is floored at zero, and a `Restock` is
    /// capped at the authoritative total imported.
    pub async fn adjust_stock(
        &self,
        product_id: &str,
        delta: i64,
        meta: AdjustmentMeta,
    ) -> LedgerResult<Product> {
        Ok(self.adjust(product_id, delta, meta).await?.after)
    }

    /// [`StockAdjuster::adjust_stock`], reporting the delta actually applied
    pub async fn adjust_stock_change(
        &self,
        product_id: &str,
        delta: i64,
        meta: AdjustmentMeta,
    ) -> LedgerResult<StockChange> {
        let write = self.adjust(product_id, delta, meta).await?;
        Ok(StockChange {
            product_id: product_id.to_string(),
            delta,
            applied: write.after.stock_quantity - write.before.stock_quantity.max(0),
            stock_after: write.after.stock_quantity,
        })
    }

    #[tracing::instrument(skip(self, meta), fields(movement = meta.movement.as_str()))]
    async fn adjust(
        &self,
        product_id: &str,
        delta: i64,
        meta: AdjustmentMeta,
    ) -> LedgerResult<ProductWrite> {
        validate_movement(delta, meta.movement)?;

        let write = self
            .update_with(product_id, |current| {
                if delta == 0 {
                    return Ok(None);
                }
                apply_adjustment(current, delta, &meta, Utc::now()).map(Some)
            })
            .await?;

        tracing::debug!(
            product_id,
            delta,
            stock = write.after.stock_quantity,
            total_imported = write.after.total_imported,
            "Stock adjusted"
        );
        Ok(write)
    }

    /// Lock `product_id`, then run [`StockAdjuster::write_with_retry`]
    pub async fn update_with<F>(&self, product_id: &str, f: F) -> LedgerResult<ProductWrite>
    where
        F: Fn(&Product) -> LedgerResult<Option<Product>>,
    {
        let _guard = self.locks.lock(product_id).await;
        self.write_with_retry(product_id, f).await
    }

    /// Read the product, derive the new record with `f` and write it back.
    ///
    /// `f` returning `None` means "no change" and skips the write. A version
    /// conflict re-reads and re-applies `f`, up to the configured retry bound.
    /// Callers must already hold the product's lock.
    pub async fn write_with_retry<F>(&self, product_id: &str, f: F) -> LedgerResult<ProductWrite>
    where
        F: Fn(&Product) -> LedgerResult<Option<Product>>,
    {
        for attempt in 1..=self.max_retries {
            let current = self
                .store
                .get_product(product_id)
                .await?
                .ok_or_else(|| LedgerError::product_not_found(product_id))?;

            let Some(next) = f(&current)? else {
                return Ok(ProductWrite {
                    before: current.clone(),
                    after: current,
                });
            };

            match self.store.upsert_product(next).await {
                Ok(stored) => {
                    return Ok(ProductWrite {
                        before: current,
                        after: stored,
                    })
                }
                Err(StoreError::VersionConflict { expected, found, .. }) => {
                    tracing::warn!(product_id, attempt, expected, found, "Version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::ConcurrentModification {
            product_id: product_id.to_string(),
            attempts: self.max_retries,
        })
    }
}

/// Negative deltas of any kind only move stock; a sale cannot add and a
/// restock cannot remove
fn validate_movement(delta: i64, movement: StockMovement) -> LedgerResult<()> {
    match movement {
        StockMovement::Sale if delta > 0 => Err(LedgerError::validation(
            "delta",
            "a sale cannot add stock",
        )),
        StockMovement::Restock if delta < 0 => Err(LedgerError::validation(
            "delta",
            "a restock cannot remove stock",
        )),
        _ => Ok(()),
    }
}

/// Pure ledger arithmetic for one adjustment
pub fn apply_adjustment(
    product: &Product,
    delta: i64,
    meta: &AdjustmentMeta,
    now: DateTime<Utc>,
) -> LedgerResult<Product> {
    validate_movement(delta, meta.movement)?;

    let total_before = authoritative_total_imported(product);
    if total_before < 0 || product.total_imported < 0 {
        return Err(LedgerError::InvariantViolation(format!(
            "product {} has negative total imported ({})",
            product.id, total_before
        )));
    }

    let mut next = product.clone();
    next.stock_quantity = product.stock_quantity.max(0).saturating_add(delta).max(0);

    if delta > 0 && meta.movement.records_import() {
        let date = meta.date.unwrap_or(now);
        next.import_history.push(ImportRecord::new(
            delta,
            meta.unit_cost,
            meta.note.clone(),
            date,
        ));
        next.total_imported = total_before + delta;
        // A legacy record starts its history from the snapshot total
        if !product.history_is_authoritative() && total_before > 0 {
            next.import_history.insert(
                0,
                ImportRecord::new(
                    total_before,
                    product.import_price,
                    Some("opening balance from legacy total".to_string()),
                    product.last_import_date.unwrap_or(product.created_at),
                ),
            );
        }
        next.last_import_date = Some(match product.last_import_date {
            Some(last) if last > date => last,
            _ => date,
        });
        if meta.unit_cost.is_some() {
            next.import_price = meta.unit_cost;
        }
    }

    // Removing stock never worsens the bound, so legacy records can still sell
    let total_after = authoritative_total_imported(&next);
    if delta > 0 && meta.movement == StockMovement::Restock {
        // Give back only what fits; the caller sees the rest as `delta - applied`
        let room = total_after.max(product.stock_quantity.max(0));
        next.stock_quantity = next.stock_quantity.min(room);
    } else if delta > 0 && next.stock_quantity > total_after {
        return Err(LedgerError::InvariantViolation(format!(
            "product {}: stock {} would exceed total imported {}",
            product.id, next.stock_quantity, total_after
        )));
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn product(stock: i64, total: i64) -> Product {
        let now = Utc::now();
        Product {
            id: "rice".into(),
            name: "Rice".into(),
            selling_price: Decimal::from(12),
            import_price: None,
            stock_quantity: stock,
            total_imported: total,
            import_history: Vec::new(),
            last_import_date: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[test]
    fn test_import_appends_record() {
        let p = apply_adjustment(
            &product(0, 0),
            10,
            &AdjustmentMeta::import(Some(Decimal::from(7))),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(p.stock_quantity, 10);
        assert_eq!(p.total_imported, 10);
        assert_eq!(p.import_history.len(), 1);
        assert_eq!(p.import_history[0].unit_cost, Some(Decimal::from(7)));
        assert!(p.last_import_date.is_some());
        assert_eq!(p.import_price, Some(Decimal::from(7)));
    }

    #[test]
    fn test_sale_does_not_touch_history() {
        let p = apply_adjustment(&product(5, 5), -2, &AdjustmentMeta::sale("order"), Utc::now())
            .unwrap();
        assert_eq!(p.stock_quantity, 3);
        assert_eq!(p.total_imported, 5);
        assert!(p.import_history.is_empty());
    }

    #[test]
    fn test_negative_import_is_a_stock_correction() {
        let p = apply_adjustment(&product(5, 5), -2, &AdjustmentMeta::default(), Utc::now())
            .unwrap();
        assert_eq!(p.stock_quantity, 3);
        assert_eq!(p.total_imported, 5);
        assert!(p.import_history.is_empty());
    }

    #[test]
    fn test_oversized_sale_is_floored() {
        let p = apply_adjustment(&product(3, 3), -1000, &AdjustmentMeta::sale("bulk"), Utc::now())
            .unwrap();
        assert_eq!(p.stock_quantity, 0);
    }

    #[test]
    fn test_restock_is_capped_at_total_imported() {
        let p = apply_adjustment(&product(0, 5), 10, &AdjustmentMeta::restock("x"), Utc::now())
            .unwrap();
        assert_eq!(p.stock_quantity, 5);

        let full = apply_adjustment(&product(5, 5), 1, &AdjustmentMeta::restock("x"), Utc::now())
            .unwrap();
        assert_eq!(full.stock_quantity, 5);
    }

    #[test]
    fn test_restock_on_legacy_overstock_adds_nothing() {
        let p = apply_adjustment(&product(7, 5), 2, &AdjustmentMeta::restock("x"), Utc::now())
            .unwrap();
        assert_eq!(p.stock_quantity, 7);
    }

    #[test]
    fn test_import_onto_legacy_overstock_is_rejected() {
        let err = apply_adjustment(&product(9, 0), 2, &AdjustmentMeta::import(None), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }

    #[test]
    fn test_legacy_record_above_total_can_still_sell() {
        let p = apply_adjustment(&product(5, 0), -2, &AdjustmentMeta::sale("x"), Utc::now())
            .unwrap();
        assert_eq!(p.stock_quantity, 3);
    }

    #[test]
    fn test_negative_total_is_an_invariant_violation() {
        let err = apply_adjustment(&product(0, -1), 1, &AdjustmentMeta::import(None), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }

    #[test]
    fn test_legacy_total_becomes_opening_balance() {
        let p = apply_adjustment(&product(4, 8), 2, &AdjustmentMeta::import(None), Utc::now())
            .unwrap();
        assert_eq!(p.import_history.len(), 2);
        assert_eq!(p.import_history[0].quantity, 8);
        assert_eq!(p.total_imported, 10);
        assert_eq!(authoritative_total_imported(&p), 10);
    }

    #[test]
    fn test_movement_sign_is_checked() {
        assert!(validate_movement(-1, StockMovement::Import).is_ok());
        assert!(validate_movement(1, StockMovement::Sale).is_err());
        assert!(validate_movement(-1, StockMovement::Restock).is_err());
        assert!(validate_movement(-1, StockMovement::Sale).is_ok());
    }
}
