//! Domain models for the inventory ledger

mod adjustment;
mod order;
mod product;

pub use adjustment::*;
pub use order::*;
pub use product::*;
