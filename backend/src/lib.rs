//! Inventory ledger and order-stock consistency engine
//!
//! Keeps per-product stock consistent with the import ledger and the order
//! history: every stock change goes through one serialized adjustment path,
//! orders deduct and restore stock over their lifecycle, and maintenance
//! operations repair drift and merge duplicate products.

pub mod config;
pub mod error;
pub mod services;
pub mod store;

pub use config::{Config, LedgerConfig, OrderEditPolicy};
pub use error::{ErrorDetail, LedgerError, LedgerResult};
pub use services::LedgerService;
pub use store::{Collection, LedgerStore, MemoryStore, StoreError, StoreEvent, Subscription};
