//! # Fulfillment Service
//!
//! The only entry point that changes stock. Every write operation runs as
//! one SQLite transaction and is retried as a whole on contention.
//!
//! ## Transition Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  transition_order(order, pending, actor)                                │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │   1. UPDATE orders SET version = version + 1   ── claim (row lock)      │
//! │   2. SELECT status, lines                      ── read after claim      │
//! │   3. plan_transition(status, pending, lines)   ── pure, may reject      │
//! │   4. for each line:                                                     │
//! │        UPDATE inventory_ledger ... WHERE bucket >= q                    │
//! │        INSERT movements                                                 │
//! │   5. UPDATE orders SET status = pending WHERE status = ?read  ── CAS    │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Any error before COMMIT drops the transaction: ledger, movements and   │
//! │  order status roll back together.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operations
//!
//! | Operation          | Writes                                    |
//! |--------------------|-------------------------------------------|
//! | `allocate`         | none (advisory FEFO plan)                 |
//! | `receive_batch`    | batch, ledger entry, `receive` movement   |
//! | `create_order`     | draft order + lines                       |
//! | `place_order`      | allocate + create + first transition      |
//! | `transition_order` | status + one movement per line (if any)   |
//!
//! The business date used for expiry checks defaults to today (UTC) and can
//! be pinned with [`FulfillmentService::business_date`].

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::order::OrderHeader;
use crate::repository::{batch, ledger, movement, order, product};
use crate::retry::RetryPolicy;
use stockwell_core::allocation::{plan_fefo, plan_order};
use stockwell_core::fulfillment::{plan_transition, resolve_total};
use stockwell_core::ledger::{replay, MovementContext};
use stockwell_core::validation::{
    validate_new_batch, validate_new_order, validate_order_request, validate_quantity,
    validate_reference,
};
use stockwell_core::{
    ActorId, Allocation, Batch, BatchId, CoreError, LedgerEntry, Money, MovementLogEntry,
    MovementQuery, NewBatch, NewOrder, NewOrderLine, Order, OrderId, OrderRequest, OrderStatus,
    OrderWithLines, Page, ProductId, StockSummary, ValidationError,
};

/// Stored ledger entry next to the one rebuilt from the movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub stored: LedgerEntry,
    pub replayed: LedgerEntry,
    pub movement_count: usize,
    pub consistent: bool,
}

/// Transactional orchestration of allocation, ledger and order status.
///
/// ## Usage
/// ```rust,ignore
/// let service = db.fulfillment();
/// let placed = service.place_order(&request, OrderStatus::Pending).await?;
/// service.transition_order(&placed.order.id, OrderStatus::Shipping, &actor).await?;
/// ```
#[derive(Debug, Clone)]
pub struct FulfillmentService {
    db: Database,
    retry: RetryPolicy,
    business_date: Option<NaiveDate>,
}

impl FulfillmentService {
    pub fn new(db: Database) -> Self {
        FulfillmentService {
            db,
            retry: RetryPolicy::default(),
            business_date: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pins the date expiry is judged against.
    pub fn business_date(mut self, date: NaiveDate) -> Self {
        self.business_date = Some(date);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.business_date.unwrap_or_else(|| Utc::now().date_naive())
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Plans which batches would supply `qty` units of a product, FEFO.
    ///
    /// Nothing is reserved. The plan is only as good as the moment it was
    /// read; `place_order` re-plans inside its own transaction.
    pub async fn allocate(&self, product_id: &ProductId, qty: i64) -> DbResult<Vec<Allocation>> {
        validate_quantity(qty)?;

        let pool = self.db.pool();
        product::require_active(pool, product_id).await?;

        let today = self.today();
        let candidates = batch::fetch_availability(pool, product_id, today).await?;
        let plan = plan_fefo(product_id, qty, &candidates, today)?;

        debug!(product_id = %product_id, qty, batches = plan.len(), "Allocation planned");
        Ok(plan)
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Records a received lot and puts its full quantity on the shelf.
    pub async fn receive_batch(
        &self,
        new_batch: &NewBatch,
        actor: &ActorId,
    ) -> DbResult<(Batch, LedgerEntry)> {
        validate_new_batch(new_batch)?;
        validate_reference("actor_id", actor.as_str())?;

        self.retry
            .run("receive_batch", move || self.try_receive_batch(new_batch, actor))
            .await
    }

    async fn try_receive_batch(
        &self,
        new_batch: &NewBatch,
        actor: &ActorId,
    ) -> DbResult<(Batch, LedgerEntry)> {
        let mut tx = self.db.pool().begin().await?;

        product::require_active(&mut *tx, &new_batch.product_id).await?;
        let batch = batch::insert_batch(&mut tx, new_batch, actor).await?;

        let ctx = MovementContext::new(actor.clone(), format!("received batch {}", batch.batch_code));
        let (entry, _) =
            ledger::receive(&mut tx, &batch.id, &batch.product_id, batch.received_quantity, &ctx).await?;

        tx.commit().await?;

        info!(
            batch_id = %batch.id,
            batch_code = %batch.batch_code,
            product_id = %batch.product_id,
            expiry = %batch.expiry_date,
            qty = batch.received_quantity,
            "Batch received"
        );

        Ok((batch, entry))
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Creates a draft order from lines already bound to batches.
    ///
    /// Stock is untouched until the order is transitioned.
    ///
    /// ## Errors
    /// - `BatchNotFound`, `BatchProductMismatch`, `BatchExpired` per line
    /// - `ProductNotFound` when a line's product is missing or inactive
    pub async fn create_order(&self, new_order: &NewOrder) -> DbResult<Order> {
        validate_new_order(new_order)?;

        self.retry
            .run("create_order", move || self.try_create_order(new_order))
            .await
    }

    async fn try_create_order(&self, new_order: &NewOrder) -> DbResult<Order> {
        let today = self.today();
        let mut tx = self.db.pool().begin().await?;

        let order_number = order::next_order_number(&mut tx).await?;

        for line in &new_order.lines {
            let bound = batch::fetch_batch(&mut *tx, &line.batch_id)
                .await?
                .ok_or_else(|| CoreError::BatchNotFound(line.batch_id.clone()))?;
            if bound.product_id != line.product_id {
                return Err(CoreError::BatchProductMismatch {
                    batch_id: bound.id,
                    product_id: line.product_id.clone(),
                }
                .into());
            }
            if bound.is_expired(today) {
                return Err(CoreError::BatchExpired {
                    batch_id: bound.id,
                    expiry_date: bound.expiry_date,
                }
                .into());
            }
            product::require_active(&mut *tx, &line.product_id).await?;
        }

        let total = resolve_total(
            new_order.total_override_cents,
            new_order.lines.iter().map(|l| (l.quantity, l.unit_price_cents)),
            new_order.discount_bps,
            Money::from_cents(new_order.shipping_fee_cents),
       )?;
        let header = OrderHeader {
            order_number: &order_number,
            customer_id: &new_order.customer_id,
            actor_id: &new_order.actor_id,
            discount_bps: new_order.discount_bps,
            shipping_fee_cents: new_order.shipping_fee_cents,
            total_override_cents: new_order.total_override_cents,
            total_cents: total.cents(),
        };
        let created = order::insert_order(&mut tx, &header, &new_order.lines).await?;

        tx.commit().await?;

        info!(
            order_number = %created.order.order_number,
            order_id = %created.order.id,
            lines = created.lines.len(),
            total_cents = created.order.total_cents,
            "Draft order created"
        );

        Ok(created.order)
    }

    /// Allocates, creates and moves an order to `target` in one transaction.
    ///
    /// `target` is `pending` for back-office orders (stock reserved) or
    /// `delivered` for point-of-sale checkout (stock sold directly).
    pub async fn place_order(
        &self,
        request: &OrderRequest,
        target: OrderStatus,
    ) -> DbResult<OrderWithLines> {
        if !matches!(target, OrderStatus::Pending | OrderStatus::Delivered) {
            return Err(ValidationError::NotAllowed {
                field: "target".to_string(),
                allowed: vec![
                    OrderStatus::Pending.as_str().to_string(),
                    OrderStatus::Delivered.as_str().to_string(),
                ],
            }
            .into());
        }
        validate_order_request(request)?;

        self.retry
            .run("place_order", move || self.try_place_order(request, target))
            .await
    }

    async fn try_place_order(
        &self,
        request: &OrderRequest,
        target: OrderStatus,
    ) -> DbResult<OrderWithLines> {
        let today = self.today();
        let mut tx = self.db.pool().begin().await?;

        let order_number = order::next_order_number(&mut tx).await?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for item in &request.items {
            if !seen.insert(&item.product_id) {
                continue;
            }
            product::require_active(&mut *tx, &item.product_id).await?;
            candidates.extend(batch::fetch_availability(&mut *tx, &item.product_id, today).await?);
        }

        let lines: Vec<NewOrderLine> = plan_order(&request.items, &candidates, today)?
            .into_iter()
            .map(NewOrderLine::from)
            .collect();

        let total = resolve_total(
            request.total_override_cents,
            lines.iter().map(|l| (l.quantity, l.unit_price_cents)),
            request.discount_bps,
            Money::from_cents(request.shipping_fee_cents),
       )?;
        let header = OrderHeader {
            order_number: &order_number,
            customer_id: &request.customer_id,
            actor_id: &request.actor_id,
            discount_bps: request.discount_bps,
            shipping_fee_cents: request.shipping_fee_cents,
            total_override_cents: request.total_override_cents,
            total_cents: total.cents(),
        };
        let created = order::insert_order(&mut tx, &header, &lines).await?;
        let order_id = created.order.id.clone();

        let plan = plan_transition(OrderStatus::Draft, target, &created.lines)?;
        let ctx = MovementContext::for_order(
            request.actor_id.clone(),
            order_id.clone(),
            format!("order {order_number}: {} -> {target}", OrderStatus::Draft),
        );
        for effect in &plan.effects {
            ledger::apply_effect(&mut tx, effect, &ctx).await?;
        }

        order::claim(&mut tx, &order_id).await?;
        let placed = order::set_status(&mut tx, &order_id, OrderStatus::Draft, target, plan.payment_status).await?;

        tx.commit().await?;

        info!(
            order_number = %placed.order_number,
            order_id = %placed.id,
            status = %placed.status,
            lines = created.lines.len(),
            total_cents = placed.total_cents,
            "Order placed"
        );

        Ok(OrderWithLines {
            order: placed,
            lines: created.lines,
        })
    }

    /// Moves an order to `to`, applying the per-line ledger effects.
    ///
    /// ## Errors
    /// - `OrderNotFound`
    /// - `InvalidTransition` (nothing is written, not even the version bump)
    /// - `InsufficientShelfStock` / `InsufficientReservedStock` from any line;
    ///   the whole transition rolls back
    /// - `Contention` once retries are exhausted
    pub async fn transition_order(
        &self,
        order_id: &OrderId,
        to: OrderStatus,
        actor: &ActorId,
    ) -> DbResult<Order> {
        validate_reference("actor_id", actor.as_str())?;

        self.retry
            .run("transition_order", move || self.try_transition_order(order_id, to, actor))
            .await
    }

    async fn try_transition_order(
        &self,
        order_id: &OrderId,
        to: OrderStatus,
        actor: &ActorId,
    ) -> DbResult<Order> {
        let mut tx = self.db.pool().begin().await?;

        order::claim(&mut tx, order_id).await?;
        let current = order::fetch_order(&mut *tx, order_id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_id.clone()))?;
        let lines = order::fetch_lines(&mut *tx, order_id).await?;

        let plan = match plan_transition(current.status, to, &lines) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(
                    order_number = %current.order_number,
                    from = %current.status,
                    to = %to,
                    "Transition rejected"
                );
                return Err(err.into());
            }
        };

        let ctx = MovementContext::for_order(
            actor.clone(),
            order_id.clone(),
            format!("order {}: {} -> {}", current.order_number, current.status, to),
        );
        for effect in &plan.effects {
            ledger::apply_effect(&mut tx, effect, &ctx).await?;
        }

        let updated = order::set_status(&mut tx, order_id, current.status, to, plan.payment_status).await?;

        tx.commit().await?;

        info!(
            order_number = %updated.order_number,
            from = %plan.from,
            to = %plan.to,
            movements = plan.effects.len(),
            actor = %actor,
            "Order transitioned"
        );

        Ok(updated)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_ledger(&self, batch_id: &BatchId) -> DbResult<LedgerEntry> {
        self.db
            .ledger()
            .get(batch_id)
            .await?
            .ok_or_else(|| CoreError::BatchNotFound(batch_id.clone()).into())
    }

    pub async fn get_order(&self, order_id: &OrderId) -> DbResult<OrderWithLines> {
        self.db
            .orders()
            .get_with_lines(order_id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_id.clone()).into())
    }

    pub async fn movement_history(&self, query: &MovementQuery) -> DbResult<Page<MovementLogEntry>> {
        self.db.movements().history(query).await
    }

    /// Bucket totals over every batch of a product, inactive products
    /// included.
    pub async fn product_stock(&self, product_id: &ProductId) -> DbResult<StockSummary> {
        if product::fetch_product(self.db.pool(), product_id).await?.is_none() {
            return Err(CoreError::ProductNotFound(product_id.clone()).into());
        }
        self.db.ledger().stock_summary(product_id).await
    }

    /// Replays a batch's movement log and compares it with the stored entry.
    ///
    /// Both are read in one transaction so they describe the same moment.
    pub async fn audit_batch(&self, batch_id: &BatchId) -> DbResult<LedgerAudit> {
        let mut tx = self.db.pool().begin().await?;

        let stored = ledger::fetch_entry(&mut *tx, batch_id)
            .await?
            .ok_or_else(|| CoreError::BatchNotFound(batch_id.clone()))?;
        let movements = movement::fetch_for_batch(&mut *tx, batch_id).await?;

        tx.rollback().await?;

        let replayed = replay(batch_id, &movements)?;
        let consistent = stored.quantity_on_shelf == replayed.quantity_on_shelf
            && stored.quantity_reserved == replayed.quantity_reserved
            && stored.version == replayed.version;

        if !consistent {
            warn!(
                batch_id = %batch_id,
                stored_shelf = stored.quantity_on_shelf,
                stored_reserved = stored.quantity_reserved,
                replayed_shelf = replayed.quantity_on_shelf,
                replayed_reserved = replayed.quantity_reserved,
                "Ledger does not match its movement log"
            );
        }

        Ok(LedgerAudit {
            stored,
            replayed,
            movement_count: movements.len(),
            consistent,
        })
    }
}

impl LedgerAudit {
    /// The stored entry, or `Internal` when it diverges from its log.
    pub fn into_verified(self) -> DbResult<LedgerEntry> {
        if self.consistent {
            Ok(self.stored)
        } else {
            Err(DbError::Internal(format!(
                "ledger of batch {} diverges from its movement log",
                self.stored.batch_id
            )))
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;
    use stockwell_core::{
        CustomerId, LedgerOperation, MovementType, OrderItemRequest, PageRequest, PaymentStatus,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn actor() -> ActorId {
        ActorId::from("clerk-1")
    }

    async fn service() -> (Database, FulfillmentService) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let service = db.fulfillment().business_date(date(2024, 12, 1));
        (db, service)
    }

    async fn receive(
        service: &FulfillmentService,
        product_id: &ProductId,
        code: &str,
        expiry: NaiveDate,
        qty: i64,
    ) -> Batch {
        let (batch, entry) = service
            .receive_batch(
                &NewBatch {
                    batch_code: code.to_string(),
                    product_id: product_id.clone(),
                    expiry_date: expiry,
                    unit_cost_cents: 60,
                    unit_price_cents: 100,
                    quantity: qty,
                },
                &actor(),
            )
            .await
            .unwrap();
        assert_eq!(entry.quantity_on_shelf, qty);
        batch
    }

    fn request(items: &[(&ProductId, i64)]) -> OrderRequest {
        OrderRequest {
            customer_id: CustomerId::from("cust-7"),
            actor_id: actor(),
            items: items
                .iter()
                .map(|(product_id, quantity)| OrderItemRequest {
                    product_id: (*product_id).clone(),
                    quantity: *quantity,
                })
                .collect(),
            discount_bps: 0,
            shipping_fee_cents: 0,
            total_override_cents: None,
        }
    }

    fn draft(lines: Vec<NewOrderLine>) -> NewOrder {
        NewOrder {
            customer_id: CustomerId::from("cust-7"),
            actor_id: actor(),
            lines,
            discount_bps: 0,
            shipping_fee_cents: 0,
            total_override_cents: None,
        }
    }

    fn line(batch: &Batch, qty: i64) -> NewOrderLine {
        NewOrderLine {
            product_id: batch.product_id.clone(),
            batch_id: batch.id.clone(),
            quantity: qty,
            unit_price_cents: batch.unit_price_cents,
        }
    }

    async fn buckets(service: &FulfillmentService, batch: &Batch) -> (i64, i64) {
        let entry = service.get_ledger(&batch.id).await.unwrap();
        (entry.quantity_on_shelf, entry.quantity_reserved)
    }

    #[tokio::test]
    async fn test_fefo_allocation_and_reservation() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 5).await;
        let b2 = receive(&service, &milk.id, "B2", date(2025, 2, 1), 10).await;

        let plan = service.allocate(&milk.id, 8).await.unwrap();
        let split: Vec<_> = plan.iter().map(|a| (a.batch_id.clone(), a.quantity)).collect();
        assert_eq!(split, vec![(b1.id.clone(), 5), (b2.id.clone(), 3)]);

        // Advisory only.
        assert_eq!(buckets(&service, &b1).await, (5, 0));

        let placed = service
            .place_order(&request(&[(&milk.id, 8)]), OrderStatus::Pending)
            .await
            .unwrap();
        assert_eq!(placed.order.status, OrderStatus::Pending);
        assert_eq!(placed.lines.len(), 2);
        assert_eq!(placed.order.total_cents, 800);

        assert_eq!(buckets(&service, &b1).await, (0, 5));
        assert_eq!(buckets(&service, &b2).await, (7, 3));
    }

    #[tokio::test]
    async fn test_insufficient_stock_allocates_nothing() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 5).await;

        let err = service.allocate(&milk.id, 6).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { requested: 6, available: 5, shortfall: 1, .. })
        ));

        let err = service
            .place_order(&request(&[(&milk.id, 6)]), OrderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InsufficientStock { .. })));

        assert_eq!(buckets(&service, &b1).await, (5, 0));
        assert_eq!(db.movements().count().await.unwrap(), 1);
        assert!(db.orders().get_by_number("ORD-000001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_batches_are_skipped() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let stale = receive(&service, &milk.id, "OLD", date(2024, 11, 30), 50).await;
        let fresh = receive(&service, &milk.id, "NEW", date(2024, 12, 1), 5).await;

        let plan = service.allocate(&milk.id, 5).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].batch_id, fresh.id);

        let err = service.create_order(&draft(vec![line(&stale, 1)])).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::BatchExpired { .. })));
    }

    #[tokio::test]
    async fn test_cancel_returns_reservation() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 5).await;

        let placed = service
            .place_order(&request(&[(&milk.id, 3)]), OrderStatus::Pending)
            .await
            .unwrap();
        assert_eq!(buckets(&service, &b1).await, (2, 3));

        let cancelled = service
            .transition_order(&placed.order.id, OrderStatus::Cancelled, &actor())
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(buckets(&service, &b1).await, (5, 0));

        let movements = db.movements().for_order(&placed.order.id).await.unwrap();
        assert_eq!(movements.len(), 2);
        let last = &movements[1];
        assert_eq!(last.movement_type, MovementType::In);
        assert_eq!(last.quantity, 3);
        assert_eq!(last.operation, LedgerOperation::ReservedToShelf);
        assert_eq!(last.actor_id, actor());
    }

    #[tokio::test]
    async fn test_direct_sale_from_draft() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 2).await;

        let order = service.create_order(&draft(vec![line(&b1, 2)])).await.unwrap();
        assert_eq!(order.status, OrderStatus::Draft);
        assert_eq!(buckets(&service, &b1).await, (2, 0));

        let delivered = service
            .transition_order(&order.id, OrderStatus::Delivered, &actor())
            .await
            .unwrap();
        assert_eq!(delivered.payment_status, PaymentStatus::Paid);
        assert_eq!(buckets(&service, &b1).await, (0, 0));

        let movements = db.movements().for_order(&order.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Out);
        assert_eq!(movements[0].quantity, -2);
        assert_eq!(movements[0].operation, LedgerOperation::ShelfToSold);
    }

    #[tokio::test]
    async fn test_refund_restocks_shelf() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 10).await;

        let mut pos = request(&[(&milk.id, 4)]);
        pos.customer_id = CustomerId::guest();
        let sold = service.place_order(&pos, OrderStatus::Delivered).await.unwrap();
        assert!(sold.order.customer_id.is_guest());
        assert_eq!(sold.order.payment_status, PaymentStatus::Paid);
        assert_eq!(buckets(&service, &b1).await, (6, 0));

        let refunded = service
            .transition_order(&sold.order.id, OrderStatus::Refunded, &actor())
            .await
            .unwrap();
        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(buckets(&service, &b1).await, (10, 0));
    }

    #[tokio::test]
    async fn test_shipping_round_trip_then_delivery() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 4).await;

        let placed = service
            .place_order(&request(&[(&milk.id, 4)]), OrderStatus::Pending)
            .await
            .unwrap();
        let id = placed.order.id;

        service.transition_order(&id, OrderStatus::Shipping, &actor()).await.unwrap();
        service.transition_order(&id, OrderStatus::Pending, &actor()).await.unwrap();
        service.transition_order(&id, OrderStatus::Shipping, &actor()).await.unwrap();
        assert_eq!(buckets(&service, &b1).await, (0, 4));

        let delivered = service.transition_order(&id, OrderStatus::Delivered, &actor()).await.unwrap();
        assert_eq!(delivered.version, 5);
        assert_eq!(delivered.payment_status, PaymentStatus::Unpaid);
        assert_eq!(buckets(&service, &b1).await, (0, 0));

        // receive, reserve, sell
        assert_eq!(db.movements().all_for_batch(&b1.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_transition_changes_nothing() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 5).await;
        let order = service.create_order(&draft(vec![line(&b1, 1)])).await.unwrap();

        for to in [OrderStatus::Shipping, OrderStatus::Refunded, OrderStatus::Draft] {
            let err = service.transition_order(&order.id, to, &actor()).await.unwrap_err();
            assert!(matches!(
                err,
                DbError::Domain(CoreError::InvalidTransition { from: OrderStatus::Draft, .. })
            ));
        }

        let after = service.get_order(&order.id).await.unwrap().order;
        assert_eq!(after.status, OrderStatus::Draft);
        assert_eq!(after.version, order.version);
        assert_eq!(buckets(&service, &b1).await, (5, 0));
        assert_eq!(db.movements().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_line_rolls_back_whole_transition() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 5).await;
        let b2 = receive(&service, &milk.id, "B2", date(2025, 2, 1), 10).await;

        let order = service
            .create_order(&draft(vec![line(&b1, 2), line(&b2, 50)]))
            .await
            .unwrap();

        let err = service
            .transition_order(&order.id, OrderStatus::Pending, &actor())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientShelfStock { available: 10, requested: 50, .. })
        ));

        assert_eq!(buckets(&service, &b1).await, (5, 0));
        assert_eq!(buckets(&service, &b2).await, (10, 0));
        assert!(db.movements().for_order(&order.id).await.unwrap().is_empty());
        assert_eq!(service.get_order(&order.id).await.unwrap().order.status, OrderStatus::Draft);
    }

    #[tokio::test]
    async fn test_create_order_checks_lines_and_numbers() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let eggs = db.products().create("EGGS-12", "Eggs x12").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 5).await;

        let mut mismatched = line(&b1, 1);
        mismatched.product_id = eggs.id.clone();
        let err = service.create_order(&draft(vec![mismatched])).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::BatchProductMismatch { .. })));

        let mut ghost = line(&b1, 1);
        ghost.batch_id = BatchId::from("ghost");
        let err = service.create_order(&draft(vec![ghost])).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::BatchNotFound(_))));

        let err = service.create_order(&draft(vec![])).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));

        let mut discounted = draft(vec![line(&b1, 2), line(&b1, 1)]);
        discounted.discount_bps = 1000;
        discounted.shipping_fee_cents = 250;
        let first = service.create_order(&discounted).await.unwrap();
        assert_eq!(first.order_number, "ORD-000001");
        assert_eq!(first.total_cents, 520);

        let mut fixed = draft(vec![line(&b1, 1)]);
        fixed.total_override_cents = Some(42);
        let second = service.create_order(&fixed).await.unwrap();
        assert_eq!(second.order_number, "ORD-000002");
        assert_eq!(second.total_cents, 42);

        let lines = service.get_order(&first.id).await.unwrap().lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_oversized_order_total_is_rejected() {
        let (db, service) = service().await;
        let gold = db.products().create("GOLD-BAR", "Gold Bar").await.unwrap();
        let (bar, _) = service
            .receive_batch(
                &NewBatch {
                    batch_code: "G1".to_string(),
                    product_id: gold.id.clone(),
                    expiry_date: date(2030, 1, 1),
                    unit_cost_cents: 1,
                    unit_price_cents: i64::MAX / 2,
                    quantity: 10,
                },
                &actor(),
            )
            .await
            .unwrap();

        let err = service.create_order(&draft(vec![line(&bar, 3)])).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::Validation(ValidationError::OutOfRange { ref field, .. }))
                if field == "total_cents"
        ));

        let mut overridden = draft(vec![line(&bar, 3)]);
        overridden.total_override_cents = Some(100);
        assert!(service.create_order(&overridden).await.is_err());

        let err = service
            .place_order(&request(&[(&gold.id, 3)]), OrderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));

        assert_eq!(buckets(&service, &bar).await, (10, 0));
        let orders = db.orders().list(None, PageRequest::first(10)).await.unwrap();
        assert_eq!(orders.total, 0);

        let fits = service.create_order(&draft(vec![line(&bar, 2)])).await.unwrap();
        assert_eq!(fits.total_cents, i64::MAX - 1);
    }

    #[tokio::test]
    async fn test_cancel_draft_writes_no_movements() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 5).await;
        let order = service.create_order(&draft(vec![line(&b1, 3)])).await.unwrap();

        let cancelled = service
            .transition_order(&order.id, OrderStatus::Cancelled, &actor())
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(db.movements().for_order(&order.id).await.unwrap().is_empty());
        assert_eq!(buckets(&service, &b1).await, (5, 0));
    }

    #[tokio::test]
    async fn test_unknown_entities() {
        let (_db, service) = service().await;

        let err = service
            .transition_order(&OrderId::from("nope"), OrderStatus::Pending, &actor())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::OrderNotFound(_))));

        let err = service.get_ledger(&BatchId::from("nope")).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::BatchNotFound(_))));

        let err = service.allocate(&ProductId::from("nope"), 1).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ProductNotFound(_))));

        let err = service.product_stock(&ProductId::from("nope")).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_inactive_product_cannot_receive() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        db.products().set_active(&milk.id, false).await.unwrap();

        let err = service
            .receive_batch(
                &NewBatch {
                    batch_code: "B1".to_string(),
                    product_id: milk.id.clone(),
                    expiry_date: date(2025, 1, 1),
                    unit_cost_cents: 60,
                    unit_price_cents: 100,
                    quantity: 5,
                },
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ProductNotFound(_))));
        assert_eq!(db.movements().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_place_order_rejects_other_targets() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();

        let err = service
            .place_order(&request(&[(&milk.id, 1)]), OrderStatus::Shipping)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_replay_matches_ledger() {
        let (db, service) = service().await;
        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let b1 = receive(&service, &milk.id, "B1", date(2025, 1, 1), 10).await;

        let a = service.place_order(&request(&[(&milk.id, 3)]), OrderStatus::Pending).await.unwrap();
        let b = service.place_order(&request(&[(&milk.id, 2)]), OrderStatus::Delivered).await.unwrap();
        service.transition_order(&a.order.id, OrderStatus::Cancelled, &actor()).await.unwrap();
        service.transition_order(&b.order.id, OrderStatus::Refunded, &actor()).await.unwrap();

        let audit = service.audit_batch(&b1.id).await.unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.movement_count, 5);
        assert_eq!(audit.replayed.quantity_on_shelf, 10);
        assert_eq!(audit.into_verified().unwrap().quantity_reserved, 0);

        let summary = service.product_stock(&milk.id).await.unwrap();
        assert_eq!(summary.quantity_on_hand(), 10);

        let history = service
            .movement_history(&MovementQuery::for_product(milk.id.clone()))
            .await
            .unwrap();
        assert_eq!(history.total, 5);
        assert!(history.items.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reservation_of_last_unit() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("race.db")).max_connections(4))
            .await
            .unwrap();
        let service = db.fulfillment().business_date(date(2024, 12, 1));

        let milk = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();
        let last = receive(&service, &milk.id, "LAST", date(2025, 1, 1), 1).await;
        let first = service.create_order(&draft(vec![line(&last, 1)])).await.unwrap();
        let second = service.create_order(&draft(vec![line(&last, 1)])).await.unwrap();

        let clerk = actor();
        let (a, b) = tokio::join!(
            service.transition_order(&first.id, OrderStatus::Pending, &clerk),
            service.transition_order(&second.id, OrderStatus::Pending, &clerk),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(
            matches!(loser, DbError::Domain(CoreError::InsufficientShelfStock { .. })) || loser.is_retryable(),
            "unexpected error: {loser}"
        );

        assert_eq!(buckets(&service, &last).await, (0, 1));
        assert_eq!(db.movements().all_for_batch(&last.id).await.unwrap().len(), 2);
        assert!(service.audit_batch(&last.id).await.unwrap().consistent);
    }
}
