//! # Fulfillment State Machine
//!
//! The order status transition table, as a pure function.
//!
//! ## Transition Table
//! ```text
//! ┌──────────────────────────────┬─────────────────────────────────────────┐
//! │ Transition                   │ Ledger effect (per line)                │
//! ├──────────────────────────────┼─────────────────────────────────────────┤
//! │ draft    → pending           │ shelf_to_reserved                       │
//! │ draft    → delivered         │ shelf_to_sold          (POS sale)       │
//! │ draft    → cancelled         │ none                                    │
//! │ pending  → shipping          │ none                                    │
//! │ shipping → pending           │ none                                    │
//! │ pending  → delivered         │ reserved_to_sold                        │
//! │ shipping → delivered         │ reserved_to_sold                        │
//! │ pending  → cancelled         │ reserved_to_shelf                       │
//! │ shipping → cancelled         │ reserved_to_shelf                       │
//! │ delivered→ refunded          │ sold_to_shelf          (return)         │
//! │ anything else                │ InvalidTransition, nothing happens      │
//! └──────────────────────────────┴─────────────────────────────────────────┘
//! ```
//!
//! The current status is an explicit argument. Callers read it inside the
//! same transaction that applies the plan; nothing here remembers state.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::ledger::LedgerOperation;
use crate::money::Money;
use crate::types::{BatchId, OrderLine, OrderLineId, OrderStatus, PaymentStatus, ProductId};

use OrderStatus::*;

// =============================================================================
// Transition Table
// =============================================================================

/// What a legal transition does to stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Status changes, stock does not.
    None,
    /// Apply this operation to every line.
    PerLine(LedgerOperation),
}

/// Looks up `from → to` in the transition table.
pub fn transition_effect(from: OrderStatus, to: OrderStatus) -> CoreResult<TransitionEffect> {
    let effect = match (from, to) {
        (Draft, Pending) => TransitionEffect::PerLine(LedgerOperation::ShelfToReserved),
        (Draft, Delivered) => TransitionEffect::PerLine(LedgerOperation::ShelfToSold),
        (Draft, Cancelled) => TransitionEffect::None,
        (Pending, Shipping) | (Shipping, Pending) => TransitionEffect::None,
        (Pending | Shipping, Delivered) => TransitionEffect::PerLine(LedgerOperation::ReservedToSold),
        (Pending | Shipping, Cancelled) => TransitionEffect::PerLine(LedgerOperation::ReservedToShelf),
        (Delivered, Refunded) => TransitionEffect::PerLine(LedgerOperation::SoldToShelf),
        _ => return Err(CoreError::InvalidTransition { from, to }),
    };
    Ok(effect)
}

/// Whether `from → to` is in the table.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    transition_effect(from, to).is_ok()
}

/// Payment status implied by entering `to` from `from`, if any.
///
/// A POS sale (`draft → delivered`) is settled at the till; a refund
/// reverses whatever was paid.
pub fn payment_status_after(from: OrderStatus, to: OrderStatus) -> Option<PaymentStatus> {
    match (from, to) {
        (Draft, Delivered) => Some(PaymentStatus::Paid),
        (_, Refunded) => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

// =============================================================================
// Transition Plan
// =============================================================================

/// One ledger mutation the transition requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEffect {
    pub line_id: OrderLineId,
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub operation: LedgerOperation,
}

/// Everything a transition must apply, computed up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub effects: Vec<LedgerEffect>,
    pub payment_status: Option<PaymentStatus>,
}

impl TransitionPlan {
    pub fn touches_stock(&self) -> bool {
        !self.effects.is_empty()
    }
}

/// Computes the full effect of moving an order with `lines` from
/// `current` to `requested`.
///
/// Effects come out in line order, one per line. The caller applies them
/// as a unit: if any one fails, none may persist.
pub fn plan_transition(
    current: OrderStatus,
    requested: OrderStatus,
    lines: &[OrderLine],
) -> CoreResult<TransitionPlan> {
    let effects = match transition_effect(current, requested)? {
        TransitionEffect::None => Vec::new(),
        TransitionEffect::PerLine(operation) => lines
            .iter()
            .map(|line| LedgerEffect {
                line_id: line.id.clone(),
                batch_id: line.batch_id.clone(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                operation,
            })
            .collect(),
    };

    Ok(TransitionPlan {
        from: current,
        to: requested,
        effects,
        payment_status: payment_status_after(current, requested),
    })
}

// =============================================================================
// Order Total
// =============================================================================

/// Derived order total:
/// `Σ(quantity × unit_price) × (1 − discount_bps / 10000) + shipping_fee`.
///
/// ## When This Occurs
/// - `Validation(OutOfRange)` on `total_cents` when a line total, the
///   subtotal or the shipped total does not fit in `i64` cents
pub fn compute_total(
    lines: impl IntoIterator<Item = (i64, i64)>,
    discount_bps: u32,
    shipping_fee: Money,
) -> CoreResult<Money> {
    let line_totals = lines
        .into_iter()
        .map(|(quantity, unit_price_cents)| Money::from_cents(unit_price_cents).multiply_quantity(quantity))
        .collect::<Option<Vec<Money>>>()
        .ok_or_else(total_out_of_range)?;
    let subtotal = Money::checked_sum(line_totals).ok_or_else(total_out_of_range)?;

    subtotal
        .apply_percentage_discount(discount_bps)
        .checked_add(shipping_fee)
        .ok_or_else(total_out_of_range)
}

/// The total to store: an explicit override wins, otherwise the derived
/// total. The derived total is computed either way, so an order whose
/// lines cannot be totalled is refused even when overridden.
pub fn resolve_total(
    override_cents: Option<i64>,
    lines: impl IntoIterator<Item = (i64, i64)>,
    discount_bps: u32,
    shipping_fee: Money,
) -> CoreResult<Money> {
    let derived = compute_total(lines, discount_bps, shipping_fee)?;
    Ok(override_cents.map(Money::from_cents).unwrap_or(derived))
}

fn total_out_of_range() -> CoreError {
    CoreError::Validation(ValidationError::OutOfRange {
        field: "total_cents".to_string(),
        min: 0,
        max: i64::MAX,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
