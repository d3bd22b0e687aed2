//! Order and order line models

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::Product;
use crate::validation::validate_non_negative_amount;

/// Delivery status of an order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "Pending"),
            OrderStatus::PickedUp => write!(f, "Picked Up"),
            OrderStatus::InTransit => write!(f, "In Transit"),
            OrderStatus::Delivered => write!(f, "Delivered"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A customer order grouped into a delivery run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct Order {
    pub id: Uuid,
    /// Delivery run this order belongs to
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub status: OrderStatus,
    #[validate]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single order line.
///
/// `product_id` is a weak reference: the line keeps its own name and price
/// snapshot and stays valid if the product is deleted or merged away.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct OrderItem {
    #[serde(default)]
    pub product_id: Option<String>,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    #[validate(custom = "validate_non_negative_amount")]
    pub price: Decimal,
    #[serde(default)]
    pub import_price_snapshot: Option<Decimal>,
}

impl OrderItem {
    /// Line linked to a catalog product, snapshotting its current name and prices
    pub fn for_product(product: &Product, quantity: i64) -> Self {
        Self {
            product_id: Some(product.id.clone()),
            name: product.name.clone(),
            quantity,
            price: product.selling_price,
            import_price_snapshot: product.import_price,
        }
    }

    /// Ad-hoc line with no catalog product
    pub fn ad_hoc(name: impl Into<String>, quantity: i64, price: Decimal) -> Self {
        Self {
            product_id: None,
            name: name.into(),
            quantity,
            price,
            import_price_snapshot: None,
        }
    }

    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.price
    }

    /// Name and price to show for this line.
    ///
    /// Uses the live product name when the id still resolves in `catalog`,
    /// otherwise falls back to the stored snapshot.
    pub fn resolve_display<'a>(&'a self, catalog: &'a HashMap<String, Product>) -> (&'a str, Decimal) {
        match self.product_id.as_ref().and_then(|id| catalog.get(id)) {
            Some(product) => (product.name.as_str(), self.price),
            None => (self.name.as_str(), self.price),
        }
    }
}

impl Order {
    pub fn new(batch_id: Option<String>, items: Vec<OrderItem>) -> Self {
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::new_v4(),
            batch_id,
            status: OrderStatus::Pending,
            items,
            total_price: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        order.recompute_total();
        order
    }

    /// Σ quantity × price over all lines
    pub fn compute_total(&self) -> Decimal {
        calculate_order_total(&self.items)
    }

    pub fn recompute_total(&mut self) {
        self.total_price = self.compute_total();
    }

    /// Quantities per linked product; ad-hoc lines are skipped
    pub fn quantities_by_product(&self) -> HashMap<String, i64> {
        let mut totals = HashMap::new();
        for item in &self.items {
            if let Some(product_id) = &item.product_id {
                *totals.entry(product_id.clone()).or_insert(0) += item.quantity;
            }
        }
        totals
    }
}

pub fn calculate_order_total(items: &[OrderItem]) -> Decimal {
    items.iter().map(OrderItem::line_total).sum()
}
