//! # Inventory Ledger Model
//!
//! Pure bucket arithmetic for one batch's stock record, and the movement
//! records that audit it.
//!
//! ## Buckets
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         One Batch                                       │
//! │                                                                         │
//! │   receive ──► ┌───────────┐  shelf_to_reserved  ┌────────────┐          │
//! │               │ on_shelf  │ ──────────────────► │  reserved  │          │
//! │   refund ───► │ (FEFO     │ ◄────────────────── │  (open     │          │
//! │ sold_to_shelf │ allocates)│  reserved_to_shelf  │   orders)  │          │
//! │               └─────┬─────┘                     └─────┬──────┘          │
//! │                     │ shelf_to_sold                   │ reserved_to_sold│
//! │                     ▼                                 ▼                 │
//! │                 ═══════════════ sold (leaves the system) ═══════        │
//! │                                                                         │
//! │   on_hand = on_shelf + reserved        both buckets ≥ 0, always         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Audit Correspondence
//! Every operation is recorded as exactly one [`MovementLogEntry`] carrying
//! the operation and the signed quantity. Since the operation determines
//! both bucket deltas, [`replay`] can rebuild a ledger entry from nothing
//! but its movements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{ActorId, BatchId, MovementId, OrderId, ProductId};

// =============================================================================
// Movement Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MovementType::In => "in",
            MovementType::Out => "out",
        })
    }
}

// =============================================================================
// Ledger Operation
// =============================================================================

/// The primitive mutations a ledger entry supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOperation {
    /// Initial stock of a newly received lot.
    Receive,
    /// Reserve for an open order.
    ShelfToReserved,
    /// A reservation becomes a completed sale.
    ReservedToSold,
    /// Direct sale with no reservation stage (POS).
    ShelfToSold,
    /// Cancelled reservation goes back on the shelf.
    ReservedToShelf,
    /// Customer return after a sale.
    SoldToShelf,
}

impl LedgerOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LedgerOperation::Receive => "receive",
            LedgerOperation::ShelfToReserved => "shelf_to_reserved",
            LedgerOperation::ReservedToSold => "reserved_to_sold",
            LedgerOperation::ShelfToSold => "shelf_to_sold",
            LedgerOperation::ReservedToShelf => "reserved_to_shelf",
            LedgerOperation::SoldToShelf => "sold_to_shelf",
        }
    }

    /// `(on_shelf Δ, reserved Δ)` for moving `qty` units.
    pub const fn bucket_deltas(&self, qty: i64) -> (i64, i64) {
        match self {
            LedgerOperation::Receive => (qty, 0),
            LedgerOperation::ShelfToReserved => (-qty, qty),
            LedgerOperation::ReservedToSold => (0, -qty),
            LedgerOperation::ShelfToSold => (-qty, 0),
            LedgerOperation::ReservedToShelf => (qty, -qty),
            LedgerOperation::SoldToShelf => (qty, 0),
        }
    }

    pub const fn movement_type(&self) -> MovementType {
        match self {
            LedgerOperation::Receive
            | LedgerOperation::ReservedToShelf
            | LedgerOperation::SoldToShelf => MovementType::In,
            LedgerOperation::ShelfToReserved
            | LedgerOperation::ReservedToSold
            | LedgerOperation::ShelfToSold => MovementType::Out,
        }
    }

    /// Signed quantity recorded on the movement: positive for `in`,
    /// negative for `out`.
    pub const fn signed_quantity(&self, qty: i64) -> i64 {
        match self.movement_type() {
            MovementType::In => qty,
            MovementType::Out => -qty,
        }
    }
}

impl fmt::Display for LedgerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where `return_to_shelf` takes its units from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnSource {
    /// Undo a reservation (cancellation).
    Reserved,
    /// Goods come back after a sale (refund).
    Sold,
}

impl ReturnSource {
    pub const fn operation(&self) -> LedgerOperation {
        match self {
            ReturnSource::Reserved => LedgerOperation::ReservedToShelf,
            ReturnSource::Sold => LedgerOperation::SoldToShelf,
        }
    }
}

// =============================================================================
// Ledger Entry
// =============================================================================

/// The mutable stock record of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LedgerEntry {
    pub batch_id: BatchId,
    pub quantity_on_shelf: i64,
    pub quantity_reserved: i64,
    pub version: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A ledger entry holding nothing, as created alongside a new batch.
    pub fn empty(batch_id: BatchId, at: DateTime<Utc>) -> Self {
        LedgerEntry {
            batch_id,
            quantity_on_shelf: 0,
            quantity_reserved: 0,
            version: 0,
            updated_at: at,
        }
    }

    pub fn quantity_on_hand(&self) -> i64 {
        self.quantity_on_shelf + self.quantity_reserved
    }

    /// Applies `operation` for `qty` units, returning the updated entry.
    ///
    /// ## Errors
    /// - `Validation` when `qty <= 0`
    /// - `InsufficientShelfStock` when the shelf would go negative
    /// - `InsufficientReservedStock` when the reservation would go negative
    ///
    /// `self` is left untouched on error.
    pub fn apply(
        &self,
        operation: LedgerOperation,
        qty: i64,
        at: DateTime<Utc>,
    ) -> CoreResult<LedgerEntry> {
        check_quantity(qty)?;

        let (shelf_delta, reserved_delta) = operation.bucket_deltas(qty);
        let on_shelf = self.quantity_on_shelf + shelf_delta;
        let reserved = self.quantity_reserved + reserved_delta;

        if on_shelf < 0 {
            return Err(CoreError::InsufficientShelfStock {
                batch_id: self.batch_id.clone(),
                available: self.quantity_on_shelf,
                requested: qty,
            });
        }
        if reserved < 0 {
            return Err(CoreError::InsufficientReservedStock {
                batch_id: self.batch_id.clone(),
                available: self.quantity_reserved,
                requested: qty,
            });
        }

        Ok(LedgerEntry {
            batch_id: self.batch_id.clone(),
            quantity_on_shelf: on_shelf,
            quantity_reserved: reserved,
            version: self.version + 1,
            updated_at: at,
        })
    }
}

/// Rejects non-positive mutation quantities.
pub fn check_quantity(qty: i64) -> CoreResult<()> {
    if qty <= 0 {
        return Err(ValidationError::must_be_positive("quantity").into());
    }
    Ok(())
}

// =============================================================================
// Movement Log Entry
// =============================================================================

/// Immutable audit record of a single ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MovementLogEntry {
    /// Store-assigned append order.
    pub seq: i64,
    pub id: MovementId,
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    /// Signed delta: `+q` for `in`, `-q` for `out`.
    pub quantity: i64,
    pub operation: LedgerOperation,
    pub reason: String,
    pub actor_id: ActorId,
    pub order_id: Option<OrderId>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl MovementLogEntry {
    /// Unsigned number of units moved.
    pub fn units(&self) -> i64 {
        self.quantity.abs()
    }
}

/// Who and why, attached to every movement a mutation writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementContext {
    pub actor_id: ActorId,
    pub order_id: Option<OrderId>,
    pub reason: String,
}

impl MovementContext {
    pub fn new(actor_id: ActorId, reason: impl Into<String>) -> Self {
        MovementContext {
            actor_id,
            order_id: None,
            reason: reason.into(),
        }
    }

    pub fn for_order(actor_id: ActorId, order_id: OrderId, reason: impl Into<String>) -> Self {
        MovementContext {
            actor_id,
            order_id: Some(order_id),
            reason: reason.into(),
        }
    }
}

/// Rebuilds a batch's ledger entry from its movements, in append order.
///
/// Fails exactly where the live mutation would have failed, so a log
/// that replays cleanly is proof the buckets never went negative.
pub fn replay(batch_id: &BatchId, movements: &[MovementLogEntry]) -> CoreResult<LedgerEntry> {
    let mut ordered: Vec<&MovementLogEntry> = movements
        .iter()
        .filter(|m| &m.batch_id == batch_id)
        .collect();
    ordered.sort_by_key(|m| m.seq);

    let start = ordered.first().map(|m| m.created_at).unwrap_or_default();
    let mut entry = LedgerEntry::empty(batch_id.clone(), start);

    for movement in ordered {
        entry = entry.apply(movement.operation, movement.units(), movement.created_at)?;
    }

    Ok(entry)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(on_shelf: i64, reserved: i64) -> LedgerEntry {
        LedgerEntry {
            batch_id: BatchId::from("b1"),
            quantity_on_shelf: on_shelf,
            quantity_reserved: reserved,
            version: 3,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_reserve_moves_between_buckets() {
        let updated = entry(10, 0)
            .apply(LedgerOperation::ShelfToReserved, 4, Utc::now())
            .unwrap();
        assert_eq!(updated.quantity_on_shelf, 6);
        assert_eq!(updated.quantity_reserved, 4);
        assert_eq!(updated.quantity_on_hand(), 10);
        assert_eq!(updated.version, 4);
    }

    #[test]
    fn test_sales_leave_the_system() {
        let sold = entry(2, 3)
            .apply(LedgerOperation::ReservedToSold, 3, Utc::now())
            .unwrap();
        assert_eq!((sold.quantity_on_shelf, sold.quantity_reserved), (2, 0));

        let pos = sold.apply(LedgerOperation::ShelfToSold, 2, Utc::now()).unwrap();
        assert_eq!(pos.quantity_on_hand(), 0);
    }

    #[test]
    fn test_negative_balances_are_refused() {
        let err = entry(1, 0)
            .apply(LedgerOperation::ShelfToReserved, 2, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientShelfStock {
                batch_id: BatchId::from("b1"),
                available: 1,
                requested: 2,
            }
        );

        let err = entry(5, 1)
            .apply(LedgerOperation::ReservedToShelf, 3, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientReservedStock { available: 1, .. }));
    }

    #[test]
    fn test_non_positive_quantity_is_validation_error() {
        for qty in [0, -3] {
            let err = entry(5, 5)
                .apply(LedgerOperation::Receive, qty, Utc::now())
                .unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }
    }

    #[test]
    fn test_movement_encoding() {
        assert_eq!(LedgerOperation::ReservedToShelf.movement_type(), MovementType::In);
        assert_eq!(LedgerOperation::ReservedToShelf.signed_quantity(3), 3);
        assert_eq!(LedgerOperation::ShelfToSold.movement_type(), MovementType::Out);
        assert_eq!(LedgerOperation::ShelfToSold.signed_quantity(2), -2);
        assert_eq!(ReturnSource::Sold.operation(), LedgerOperation::SoldToShelf);
    }

    #[test]
    fn test_replay_rebuilds_entry() {
        let batch = BatchId::from("b1");
        let ops = [
            (LedgerOperation::Receive, 10),
            (LedgerOperation::ShelfToReserved, 4),
            (LedgerOperation::ReservedToSold, 3),
            (LedgerOperation::ReservedToShelf, 1),
            (LedgerOperation::ShelfToSold, 2),
            (LedgerOperation::SoldToShelf, 2),
        ];
        // Deliberately out of order; replay sorts by seq.
        let movements: Vec<MovementLogEntry> = ops
            .iter()
            .enumerate()
            .rev()
            .map(|(i, (op, qty))| MovementLogEntry {
                seq: i as i64 + 1,
                id: MovementId::generate(),
                batch_id: batch.clone(),
                product_id: ProductId::from("milk"),
                movement_type: op.movement_type(),
                quantity: op.signed_quantity(*qty),
                operation: *op,
                reason: "test".to_string(),
                actor_id: ActorId::from("clerk"),
                order_id: None,
                created_at: Utc::now(),
            })
            .collect();

        let rebuilt = replay(&batch, &movements).unwrap();
        assert_eq!(rebuilt.quantity_on_shelf, 7);
        assert_eq!(rebuilt.quantity_reserved, 0);
        assert_eq!(rebuilt.version, 6);
    }
}
