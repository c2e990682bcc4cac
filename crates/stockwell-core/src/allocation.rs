//! # FEFO Allocation
//!
//! First-Expired-First-Out planning over a product's batches.
//!
//! ## Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Request: 8 × MILK-1L                                                   │
//! │                                                                         │
//! │  1. Candidates: product matches, on_shelf > 0, not expired              │
//! │  2. Sort by (expiry_date ASC, received_seq ASC)                         │
//! │                                                                         │
//! │     B1  exp 2025-01-01  on_shelf 5   ──► take 5   (remaining 3)         │
//! │     B2  exp 2025-02-01  on_shelf 10  ──► take 3   (remaining 0)  stop   │
//! │     B3  exp 2025-03-01  on_shelf 7       untouched                      │
//! │                                                                         │
//! │  3. Result: [{B1, 5}, {B2, 3}]                                          │
//! │                                                                         │
//! │  Σ on_shelf < request?  → InsufficientStock, empty-handed               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Planning is pure: it reads a snapshot of availability and returns a plan.
//! The plan is advisory until the ledger's own conditional update commits
//! it, which is the authoritative check.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::ledger::check_quantity;
use crate::types::{Allocation, BatchId, OrderItemRequest, ProductId};

// =============================================================================
// Availability Snapshot
// =============================================================================

/// What the planner needs to know about one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct BatchAvailability {
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub expiry_date: NaiveDate,
    pub received_seq: i64,
    pub quantity_on_shelf: i64,
    pub unit_price_cents: i64,
}

impl BatchAvailability {
    /// FEFO sort key. `received_seq` breaks same-day expiry ties in receipt
    /// order so the result never depends on storage iteration order.
    fn fefo_key(&self) -> (NaiveDate, i64) {
        (self.expiry_date, self.received_seq)
    }
}

// =============================================================================
// Single Product
// =============================================================================

/// Plans a FEFO allocation of `requested` units of `product_id`.
///
/// ## Arguments
/// * `candidates` - availability snapshot; may contain other products'
///   batches, which are ignored
/// * `today` - batches whose expiry date is before this are skipped
///
/// ## Returns
/// Allocations in consumption order whose quantities sum exactly to
/// `requested`, or `InsufficientStock` naming the shortfall.
pub fn plan_fefo(
    product_id: &ProductId,
    requested: i64,
    candidates: &[BatchAvailability],
    today: NaiveDate,
) -> CoreResult<Vec<Allocation>> {
    plan_with_consumed(product_id, requested, candidates, today, &HashMap::new())
}

fn plan_with_consumed(
    product_id: &ProductId,
    requested: i64,
    candidates: &[BatchAvailability],
    today: NaiveDate,
    consumed: &HashMap<BatchId, i64>,
) -> CoreResult<Vec<Allocation>> {
    check_quantity(requested)?;

    let mut eligible: Vec<(&BatchAvailability, i64)> = candidates
        .iter()
        .filter(|b| &b.product_id == product_id && b.expiry_date >= today)
        .map(|b| {
            let already = consumed.get(&b.batch_id).copied().unwrap_or(0);
            (b, b.quantity_on_shelf - already)
        })
        .filter(|(_, available)| *available > 0)
        .collect();
    eligible.sort_by_key(|(b, _)| b.fefo_key());

    let available: i64 = eligible.iter().map(|(_, available)| available).sum();
    if available < requested {
        return Err(CoreError::insufficient_stock(
            product_id.clone(),
            requested,
            available,
        ));
    }

    let mut remaining = requested;
    let mut allocations = Vec::new();
    for (batch, available) in eligible {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(available);
        allocations.push(Allocation {
            batch_id: batch.batch_id.clone(),
            product_id: batch.product_id.clone(),
            quantity: take,
            unit_price_cents: batch.unit_price_cents,
        });
        remaining -= take;
    }

    Ok(allocations)
}

// =============================================================================
// Whole Order
// =============================================================================

/// Plans every item of an order against one availability snapshot.
///
/// Quantity taken for an earlier item is subtracted before later items are
/// planned, so two items for the same product never claim the same units.
/// All-or-nothing: the first item that cannot be covered fails the plan.
pub fn plan_order(
    items: &[OrderItemRequest],
    candidates: &[BatchAvailability],
    today: NaiveDate,
) -> CoreResult<Vec<Allocation>> {
    let mut consumed: HashMap<BatchId, i64> = HashMap::new();
    let mut plan = Vec::new();

    for item in items {
        let allocations =
            plan_with_consumed(&item.product_id, item.quantity, candidates, today, &consumed)?;
        for allocation in &allocations {
            *consumed.entry(allocation.batch_id.clone()).or_insert(0) += allocation.quantity;
        }
        plan.extend(allocations);
    }

    Ok(plan)
}

// =============================================================================
// Unit Tests
// =============================================================================
