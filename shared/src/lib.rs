//! Shared types and models for the logistics console inventory ledger
//!
//! This crate contains the ledger data model and the pure stock arithmetic
//! shared between the backend services and the browser console (via WASM).

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
