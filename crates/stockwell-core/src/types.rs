//! # Domain Types
//!
//! Core domain types used throughout Stockwell.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │     Batch       │   │  LedgerEntry    │       │
//! │  │  ─────────────  │1 N│  ─────────────  │1 1│  ─────────────  │       │
//! │  │  id             │──►│  batch_code     │──►│  on_shelf       │       │
//! │  │  sku            │   │  expiry_date    │   │  reserved       │       │
//! │  │  name           │   │  unit_price     │   │  version        │       │
//! │  └─────────────────┘   └────────┬────────┘   └────────┬────────┘       │
//! │                                 │ N                   │ 1              │
//! │  ┌─────────────────┐   ┌────────┴────────┐   ┌────────▼────────┐       │
//! │  │     Order       │1 N│   OrderLine     │   │ MovementLogEntry│       │
//! │  │  ─────────────  │──►│  ─────────────  │   │  ─────────────  │       │
//! │  │  order_number   │   │  batch_id       │   │  in / out       │       │
//! │  │  status         │   │  quantity       │   │  signed qty     │       │
//! │  │  payment_status │   │  unit_price     │   │  (append-only)  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Every entity has an opaque string id (UUID v4 when generated here).
//! Batches and orders also carry a human-readable business key
//! (`batch_code`, `order_number`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Identifiers
// =============================================================================

/// Declares an opaque string identifier newtype.
///
/// Stored as TEXT; `sqlx(transparent)` lets repositories bind and decode
/// the newtype directly.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
        #[cfg_attr(feature = "sqlx", sqlx(transparent))]
        #[serde(transparent)]
        #[ts(export)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh UUID v4 identifier.
            pub fn generate() -> Self {
                $name(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Product catalog reference.
    ProductId
);
string_id!(
    /// Received lot of a product.
    BatchId
);
string_id!(
    /// Order aggregate root.
    OrderId
);
string_id!(OrderLineId);
string_id!(MovementId);
string_id!(
    /// Employee/user reference supplied by the auth layer. Opaque here.
    ActorId
);
string_id!(
    /// Customer reference supplied by customer resolution. Opaque here.
    CustomerId
);

impl CustomerId {
    /// The reserved walk-in identity used by point-of-sale checkout.
    pub fn guest() -> Self {
        CustomerId(crate::GUEST_CUSTOMER_ID.to_string())
    }

    pub fn is_guest(&self) -> bool {
        self.0 == crate::GUEST_CUSTOMER_ID
    }
}

// =============================================================================
// Product
// =============================================================================

/// Minimal catalog record.
///
/// The catalog itself is owned by another part of the back office; the
/// ledger only needs to know that a product exists and is active.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Batch
// =============================================================================

/// A received lot of a product.
///
/// Immutable once received. `received_seq` is assigned by the store in
/// receipt order and breaks FEFO ties between lots that expire the same day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Batch {
    pub id: BatchId,
    pub batch_code: String,
    pub product_id: ProductId,
    #[ts(as = "String")]
    pub expiry_date: NaiveDate,
    /// Purchase cost per unit in cents.
    pub unit_cost_cents: i64,
    /// Selling price per unit in cents for this lot.
    pub unit_price_cents: i64,
    pub received_quantity: i64,
    pub received_seq: i64,
    pub received_by: ActorId,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Batch {
    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// A lot is expired once its expiry date is strictly before `on`.
    /// Stock expiring today can still be sold today.
    pub fn is_expired(&self, on: NaiveDate) -> bool {
        self.expiry_date < on
    }
}

/// Input for receiving a new lot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub batch_code: String,
    pub product_id: ProductId,
    pub expiry_date: NaiveDate,
    pub unit_cost_cents: i64,
    pub unit_price_cents: i64,
    pub quantity: i64,
}

// =============================================================================
// Order Status
// =============================================================================

/// Fulfillment status of an order.
///
/// ```text
///            ┌──────────► cancelled
///            │                ▲
///   draft ───┼──► pending ◄──►│shipping
///            │       │        │   │
///            │       ▼        │   │
///            └──► delivered ◄─────┘
///                    │
///                    ▼
///                 refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, lines bound to batches, no stock effect yet.
    Draft,
    /// Stock reserved for an admin-created order.
    Pending,
    /// Handed to a carrier; stock still reserved.
    Shipping,
    /// Sold. Stock has left the system.
    Delivered,
    /// Abandoned. Any reservation returned to shelf.
    Cancelled,
    /// Customer return after delivery. Stock back on shelf.
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Draft,
        OrderStatus::Pending,
        OrderStatus::Shipping,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Pending => "pending",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// `cancelled` and `refunded` accept no further transitions; `delivered`
    /// only accepts a refund.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Whether the order's lines currently hold a reservation.
    pub const fn holds_reservation(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Shipping)
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Draft
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: OrderStatus::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            })
    }
}

// =============================================================================
// Payment Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Unpaid
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        })
    }
}

// =============================================================================
// Order
// =============================================================================

/// Order aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: OrderId,
    /// Sequence-generated business key, e.g. `ORD-000042`.
    pub order_number: String,
    pub customer_id: CustomerId,
    pub actor_id: ActorId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Order-level discount in basis points (1000 = 10%).
    pub discount_bps: u32,
    pub shipping_fee_cents: i64,
    /// Explicitly set total. When `None` the total is derived from lines.
    pub total_override_cents: Option<i64>,
    pub total_cents: i64,
    /// Incremented on every write to the order row.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line item bound to one batch.
///
/// Snapshot of the allocation made at order creation; never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_price_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl OrderLine {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// `None` if quantity × price does not fit in `i64` cents.
    #[inline]
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price().multiply_quantity(self.quantity)
    }
}

/// An order together with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderWithLines {
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

// =============================================================================
// Order Inputs
// =============================================================================

/// One pre-allocated line for `create_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl From<Allocation> for NewOrderLine {
    fn from(allocation: Allocation) -> Self {
        NewOrderLine {
            product_id: allocation.product_id,
            batch_id: allocation.batch_id,
            quantity: allocation.quantity,
            unit_price_cents: allocation.unit_price_cents,
        }
    }
}

/// Input for `create_order`: lines are already bound to batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub actor_id: ActorId,
    pub lines: Vec<NewOrderLine>,
    #[serde(default)]
    pub discount_bps: u32,
    #[serde(default)]
    pub shipping_fee_cents: i64,
    #[serde(default)]
    pub total_override_cents: Option<i64>,
}

/// A product and quantity to be allocated FEFO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Input for `place_order`: the allocator picks the batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub customer_id: CustomerId,
    pub actor_id: ActorId,
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub discount_bps: u32,
    #[serde(default)]
    pub shipping_fee_cents: i64,
    #[serde(default)]
    pub total_override_cents: Option<i64>,
}

// =============================================================================
// Allocation
// =============================================================================

/// One batch's share of a FEFO allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Allocation {
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// Stock totals for one product across all of its batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockSummary {
    pub product_id: ProductId,
    pub batch_count: i64,
    pub quantity_on_shelf: i64,
    pub quantity_reserved: i64,
}

impl StockSummary {
    pub fn quantity_on_hand(&self) -> i64 {
        self.quantity_on_shelf + self.quantity_reserved
    }
}

// =============================================================================
// Paging
// =============================================================================

/// Offset pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const fn new(offset: u32, limit: u32) -> Self {
        PageRequest { offset, limit }
    }

    pub const fn first(limit: u32) -> Self {
        PageRequest { offset: 0, limit }
    }
}

/// One page of results plus the total row count for the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: u32,
    pub limit: u32,
    pub total: u64,
}

impl<T> Page<T> {
    /// Offset of the next page, if there is one.
    pub fn next_offset(&self) -> Option<u32> {
        let next = self.offset as u64 + self.items.len() as u64;
        if !self.items.is_empty() && next < self.total {
            Some(next as u32)
        } else {
            None
        }
    }
}

// =============================================================================
// Movement History Query
// =============================================================================

/// Which movements a history query covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum MovementScope {
    Batch(BatchId),
    Product(ProductId),
}

/// Paginated, optionally time-bounded movement history request.
///
/// `from` is inclusive, `to` is exclusive. Results come back in append
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementQuery {
    pub scope: MovementScope,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: PageRequest,
}

impl MovementQuery {
    pub fn for_batch(batch_id: BatchId) -> Self {
        MovementQuery {
            scope: MovementScope::Batch(batch_id),
            from: None,
            to: None,
            page: PageRequest::first(crate::DEFAULT_PAGE_SIZE),
        }
    }

    pub fn for_product(product_id: ProductId) -> Self {
        MovementQuery {
            scope: MovementScope::Product(product_id),
            from: None,
            to: None,
            page: PageRequest::first(crate::DEFAULT_PAGE_SIZE),
        }
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_parse_and_display() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert_eq!(" Shipping ".parse::<OrderStatus>().unwrap(), OrderStatus::Shipping);
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::Delivered).unwrap();
        assert_eq!(json, "\"delivered\"");
        assert_eq!(OrderStatus::default(), OrderStatus::Draft);
    }

    #[test]
    fn test_guest_customer() {
        assert!(CustomerId::guest().is_guest());
        assert!(!CustomerId::from("c-42").is_guest());
    }

    #[test]
    fn test_batch_expiry_is_inclusive_of_expiry_day() {
        let batch = Batch {
            id: BatchId::from("b1"),
            batch_code: "MILK-0101".to_string(),
            product_id: ProductId::from("milk"),
            expiry_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            unit_cost_cents: 80,
            unit_price_cents: 120,
            received_quantity: 5,
            received_seq: 1,
            received_by: ActorId::from("clerk"),
            created_at: Utc::now(),
        };
        assert!(!batch.is_expired(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(batch.is_expired(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()));
        assert_eq!(batch.unit_price().cents(), 120);
    }

    #[test]
    fn test_page_next_offset() {
        let page = Page {
            items: vec![1, 2],
            offset: 0,
            limit: 2,
            total: 5,
        };
        assert_eq!(page.next_offset(), Some(2));

        let last = Page {
            items: vec![5],
            offset: 4,
            limit: 2,
            total: 5,
        };
        assert_eq!(last.next_offset(), None);
    }
}
