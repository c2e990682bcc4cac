//! # Error Types
//!
//! Domain-specific error types for stockwell-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockwell-core errors (this file)                                     │
//! │  ├── CoreError        - Stock, allocation and transition failures      │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  stockwell-db errors (separate crate)                                  │
//! │  └── DbError          - Storage failures, contention, wraps CoreError  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → CLI (anyhow)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Semantics
//! Nothing in this file is retryable. Every `CoreError` means the request
//! itself must change (more stock, a different status, valid input).
//! The only retryable failure is storage contention, which lives in
//! `stockwell-db`.

use chrono::NaiveDate;
use thiserror::Error;

use crate::types::{BatchId, OrderId, OrderStatus, ProductId};

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Product does not exist or is inactive.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Batch does not exist.
    #[error("Batch not found: {0}")]
    BatchNotFound(BatchId),

    /// Order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// FEFO allocation cannot cover the requested quantity.
    ///
    /// ## When This Occurs
    /// ```text
    /// Request 12 units of MILK-1L
    ///      │
    ///      ▼
    /// Unexpired batches on shelf: B1=5, B2=4  (total 9)
    ///      │
    ///      ▼
    /// InsufficientStock { requested: 12, available: 9, shortfall: 3 }
    /// ```
    /// No batch is touched when this is returned.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available} (short {shortfall})"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
        shortfall: i64,
    },

    /// A ledger mutation found less on the shelf than it needed.
    ///
    /// Allocation saw enough stock but the authoritative check at mutation
    /// time did not (another order got there first). Surfaced, never
    /// silently corrected.
    #[error("Insufficient shelf stock in batch {batch_id}: available {available}, requested {requested}")]
    InsufficientShelfStock {
        batch_id: BatchId,
        available: i64,
        requested: i64,
    },

    /// A ledger mutation found less reserved stock than the order holds.
    ///
    /// Indicates a consistency anomaly: an order line claims a reservation
    /// the ledger does not have.
    #[error("Insufficient reserved stock in batch {batch_id}: reserved {available}, requested {requested}")]
    InsufficientReservedStock {
        batch_id: BatchId,
        available: i64,
        requested: i64,
    },

    /// Requested status change is not in the transition table.
    #[error("Invalid order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A line references a batch that belongs to a different product.
    #[error("Batch {batch_id} does not belong to product {product_id}")]
    BatchProductMismatch {
        batch_id: BatchId,
        product_id: ProductId,
    },

    /// A line was bound to a lot past its expiry date.
    #[error("Batch {batch_id} expired on {expiry_date}")]
    BatchExpired {
        batch_id: BatchId,
        expiry_date: NaiveDate,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Builds an `InsufficientStock` error, deriving the shortfall.
    pub fn insufficient_stock(product_id: ProductId, requested: i64, available: i64) -> Self {
        CoreError::InsufficientStock {
            product_id,
            requested,
            available,
            shortfall: requested - available,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any stock is read or written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }

    pub fn must_be_positive(field: &str) -> Self {
        ValidationError::MustBePositive {
            field: field.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
