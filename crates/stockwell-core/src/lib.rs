//! # stockwell-core: Pure Inventory Logic for Stockwell
//!
//! Batch-level stock arithmetic, FEFO allocation and the order fulfillment
//! transition table, as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockwell Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                stockwell CLI (apps/stockwell-cli)               │   │
//! │  │       receive ──► allocate ──► order place ──► transition       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │           stockwell-db (FulfillmentService, repositories)       │   │
//! │  │      one SQLite transaction per receipt / order / transition    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ plans computed here                    │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockwell-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌────────────┐ ┌─────────────┐     │   │
//! │  │   │  types   │ │  ledger  │ │ allocation │ │ fulfillment │     │   │
//! │  │   │  Batch   │ │ buckets  │ │   FEFO     │ │ transitions │     │   │
//! │  │   │  Order   │ │ movements│ │  planner   │ │  + totals   │     │   │
//! │  │   └──────────┘ └──────────┘ └────────────┘ └─────────────┘     │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Batch, Order, OrderLine, ...)
//! - [`money`] - Integer-cent money
//! - [`ledger`] - Bucket arithmetic, movement encoding, replay
//! - [`allocation`] - FEFO planner
//! - [`fulfillment`] - Order status transition table and totals
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use stockwell_core::fulfillment::plan_transition;
//! use stockwell_core::ledger::LedgerOperation;
//! use stockwell_core::OrderStatus;
//!
//! let plan = plan_transition(OrderStatus::Draft, OrderStatus::Pending, &[]).unwrap();
//! assert!(plan.effects.is_empty());
//!
//! let (shelf, reserved) = LedgerOperation::ShelfToReserved.bucket_deltas(3);
//! assert_eq!((shelf, reserved), (-3, 3));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod error;
pub mod fulfillment;
pub mod ledger;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use ledger::{LedgerEntry, LedgerOperation, MovementLogEntry, MovementType};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Reserved customer identity for walk-in point-of-sale checkout.
pub const GUEST_CUSTOMER_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Maximum lines on a single order.
pub const MAX_ORDER_LINES: usize = 100;

/// Maximum units on one line or one receipt.
///
/// Catches fat-finger entries (100000 instead of 100) at the boundary.
pub const MAX_LINE_QUANTITY: i64 = 100_000;

/// Prefix of generated order numbers (`ORD-000042`).
pub const ORDER_NUMBER_PREFIX: &str = "ORD";

/// Page size used when a history query does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page a history query may request.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Formats a sequence value as an order number.
///
/// ```rust
/// assert_eq!(stockwell_core::format_order_number(42), "ORD-000042");
/// ```
pub fn format_order_number(seq: i64) -> String {
    format!("{}-{:06}", ORDER_NUMBER_PREFIX, seq)
}
