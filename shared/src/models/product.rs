//! Product ledger models and the stock invariant model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::validation::validate_non_negative_amount;

/// A catalog product together with its stock ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    /// Derived from the normalized name at creation time
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub selling_price: Decimal,
    /// Unknown on legacy records
    #[serde(default)]
    pub import_price: Option<Decimal>,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default)]
    pub total_imported: i64,
    /// Not guaranteed to be chronological
    #[serde(default)]
    pub import_history: Vec<ImportRecord>,
    #[serde(default)]
    pub last_import_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every write
    #[serde(default)]
    pub version: u64,
}

/// A single replenishment event in a product's ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportRecord {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ImportRecord {
    pub fn new(quantity: i64, unit_cost: Option<Decimal>, note: Option<String>, date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            quantity,
            unit_cost,
            note,
        }
    }
}

impl Product {
    /// Sum of history quantities, or the stored snapshot for legacy records
    pub fn authoritative_total_imported(&self) -> i64 {
        authoritative_total_imported(self)
    }

    /// Whether the import history (rather than `total_imported`) is the source of truth
    pub fn history_is_authoritative(&self) -> bool {
        !self.import_history.is_empty()
    }

    /// Most recent import date found in the history
    pub fn latest_import_date(&self) -> Option<DateTime<Utc>> {
        self.import_history.iter().map(|r| r.date).max()
    }
}

/// Input for creating a product
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(custom = "validate_non_negative_amount")]
    pub selling_price: Decimal,
    #[validate(custom = "validate_non_negative_amount")]
    pub import_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub initial_stock: i64,
    #[validate(custom = "validate_non_negative_amount")]
    pub unit_cost: Option<Decimal>,
    /// Create a new record even when the derived id is already taken
    #[serde(default)]
    pub force_new: bool,
}

/// Descriptive fields of a product that may be edited without touching stock
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ProductDetailsUpdate {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(custom = "validate_non_negative_amount")]
    pub selling_price: Option<Decimal>,
    #[validate(custom = "validate_non_negative_amount")]
    pub import_price: Option<Decimal>,
}

/// Authoritative lifetime units received.
///
/// A non-empty history wins over the stored `total_imported`; legacy records
/// with no history fall back to the snapshot.
pub fn authoritative_total_imported(product: &Product) -> i64 {
    if product.import_history.is_empty() {
        product.total_imported
    } else {
        product.import_history.iter().map(|r| r.quantity).sum()
    }
}

/// Stock value to display, resolving history vs. snapshot disagreement.
///
/// The stored stock is bounded into `[0, authoritative_total_imported]`. Units
/// sold are not consulted here; that is what reconciliation does.
pub fn compute_authoritative_stock(product: &Product) -> i64 {
    let total = authoritative_total_imported(product).max(0);
    product.stock_quantity.clamp(0, total)
}
