//! Validation utilities for the inventory ledger
//!
//! Input checks used by the `validator` derives, and the stock invariant
//! checks every ledger write is held to.

use rust_decimal::Decimal;
use thiserror::Error;
use validator::ValidationError;

use crate::models::{authoritative_total_imported, Product};

// ============================================================================
// Input Validations
// ============================================================================

/// Currency amounts (prices, unit costs) may not be negative
pub fn validate_non_negative_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        return Err(ValidationError::new("negative_amount"));
    }
    Ok(())
}

// ============================================================================
// Stock Invariants
// ============================================================================

/// A broken ledger invariant on a product record
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("product {product_id}: stock quantity {stock} is negative")]
    NegativeStock { product_id: String, stock: i64 },

    #[error("product {product_id}: total imported {total} is negative")]
    NegativeTotalImported { product_id: String, total: i64 },

    #[error("product {product_id}: stock {stock} exceeds total imported {total}")]
    StockExceedsImported {
        product_id: String,
        stock: i64,
        total: i64,
    },

    #[error("product {product_id}: import history sums to {history_total} but {stored_total} is stored")]
    HistoryMismatch {
        product_id: String,
        history_total: i64,
        stored_total: i64,
    },
}

/// Check `stock >= 0`, `total_imported >= 0`, `total_imported >= stock` and
/// that an authoritative history agrees with the stored total.
pub fn check_product_invariants(product: &Product) -> Result<(), InvariantError> {
    if product.stock_quantity < 0 {
        return Err(InvariantError::NegativeStock {
            product_id: product.id.clone(),
            stock: product.stock_quantity,
        });
    }

    let total = authoritative_total_imported(product);
    if total < 0 || product.total_imported < 0 {
        return Err(InvariantError::NegativeTotalImported {
            product_id: product.id.clone(),
            total: total.min(product.total_imported),
        });
    }

    if product.history_is_authoritative() && total != product.total_imported {
        return Err(InvariantError::HistoryMismatch {
            product_id: product.id.clone(),
            history_total: total,
            stored_total: product.total_imported,
        });
    }

    if product.stock_quantity > total {
        return Err(InvariantError::StockExceedsImported {
            product_id: product.id.clone(),
            stock: product.stock_quantity,
            total,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImportRecord;
    use chrono::Utc;

    fn product(stock: i64, total: i64, history: &[i64]) -> Product {
        let now = Utc::now();
        Product {
            id: "p".to_string(),
            name: "P".to_string(),
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

    // ========================================================================
    // Input Validation Tests
    // ========================================================================

    #[test]
    fn test_non_negative_amount() {
        assert!(validate_non_negative_amount(&Decimal::ZERO).is_ok());
        assert!(validate_non_negative_amount(&Decimal::new(1999, 2)).is_ok());
        assert!(validate_non_negative_amount(&Decimal::new(-1, 2)).is_err());
    }

    // ========================================================================
    // Invariant Tests
    // ========================================================================

    #[test]
    fn test_sound_product_passes() {
        assert!(check_product_invariants(&product(3, 10, &[6, 4])).is_ok());
        assert!(check_product_invariants(&product(10, 10, &[])).is_ok());
        assert!(check_product_invariants(&product(0, 0, &[])).is_ok());
    }

    #[test]
    fn test_negative_stock_rejected() {
        assert!(matches!(
            check_product_invariants(&product(-1, 10, &[])),
            Err(InvariantError::NegativeStock { .. })
        ));
    }

    #[test]
    fn test_negative_total_rejected() {
        assert!(matches!(
            check_product_invariants(&product(0, -2, &[])),
            Err(InvariantError::NegativeTotalImported { .. })
        ));
    }

    #[test]
    fn test_stock_above_total_rejected() {
        assert!(matches!(
            check_product_invariants(&product(11, 10, &[])),
            Err(InvariantError::StockExceedsImported { .. })
        ));
    }

    #[test]
    fn test_history_mismatch_rejected() {
        assert!(matches!(
            check_product_invariants(&product(1, 10, &[4])),
            Err(InvariantError::HistoryMismatch { .. })
        ));
    }
}
