//! Stock adjustment metadata

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a stock adjustment represents in the ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockMovement {
    /// Goods received; raises `total_imported` and appends an import record
    #[default]
    Import,
    /// Units leaving with an order
    Sale,
    /// Units returning from a deleted, cancelled or edited order
    Restock,
}

impl StockMovement {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockMovement::Import => "import",
            StockMovement::Sale => "sale",
            StockMovement::Restock => "restock",
        }
    }

    /// Whether a positive delta of this kind is recorded in the import history
    pub fn records_import(&self) -> bool {
        matches!(self, StockMovement::Import)
    }
}

/// Metadata attached to a call of the stock adjuster
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdjustmentMeta {
    #[serde(default)]
    pub movement: StockMovement,
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
    /// Defaults to the time the adjustment is applied
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

impl AdjustmentMeta {
    pub fn import(unit_cost: Option<Decimal>) -> Self {
        Self {
            movement: StockMovement::Import,
            unit_cost,
            ..Default::default()
        }
    }

    pub fn sale(note: impl Into<String>) -> Self {
        Self {
            movement: StockMovement::Sale,
            note: Some(note.into()),
            ..Default::default()
        }
    }

    pub fn restock(note: impl Into<String>) -> Self {
        Self {
            movement: StockMovement::Restock,
            note: Some(note.into()),
            ..Default::default()
        }
    }
}
