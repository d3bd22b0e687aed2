//! Error handling for the inventory ledger
//!
//! `NotFound` and `InvariantViolation` are terminal for the item they concern;
//! `ConcurrentModification` may be retried by the caller.

use serde::Serialize;
use shared::InvariantError;
use thiserror::Error;

use crate::store::StoreError;

/// Ledger error types
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Concurrent modification of product {product_id} after {attempts} attempts")]
    ConcurrentModification { product_id: String, attempts: u32 },

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Duplicate group '{group}' was not merged: {reason}")]
    MergeIncomplete { group: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn product_not_found(id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity: "Product",
            id: id.into(),
        }
    }

    pub fn order_not_found(id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity: "Order",
            id: id.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            LedgerError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            LedgerError::Validation { .. } => "VALIDATION_ERROR",
            LedgerError::MergeIncomplete { .. } => "MERGE_INCOMPLETE",
            LedgerError::Store(_) => "STORE_ERROR",
        }
    }

    /// Only optimistic-lock exhaustion is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentModification { .. })
    }
}

impl From<InvariantError> for LedgerError {
    fn from(err: InvariantError) -> Self {
        LedgerError::InvariantViolation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for LedgerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "input".to_string());
        LedgerError::Validation {
            field,
            message: errors.to_string(),
        }
    }
}

/// Error detail carried in bulk operation reports
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<&LedgerError> for ErrorDetail {
    fn from(err: &LedgerError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
