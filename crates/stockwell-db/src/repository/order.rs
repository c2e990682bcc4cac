//! # Order Repository
//!
//! Orders, their batch-bound lines, and order number generation.
//!
//! ## Order Row Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. NUMBER    INSERT order_number_seq ──► ORD-000042                    │
//! │  2. CREATE    INSERT orders (draft) + INSERT order_lines (immutable)    │
//! │  3. CLAIM     UPDATE orders SET version = version + 1   ◄─ first write  │
//! │                                                           of every      │
//! │                                                           transition    │
//! │  4. READ      status + lines, inside the same transaction               │
//! │  5. SET       UPDATE orders SET status = ?new                           │
//! │                 WHERE id = ? AND status = ?read         (compare-and-set)│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Orders and lines are never deleted (triggers reject it).

use chrono::Utc;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use stockwell_core::validation::validate_page;
use stockwell_core::{
    format_order_number, ActorId, CoreError, CustomerId, NewOrderLine, Order, OrderId, OrderLine,
    OrderLineId, OrderStatus, OrderWithLines, Page, PageRequest, PaymentStatus,
};

const ORDER_COLUMNS: &str = "id, order_number, customer_id, actor_id, status, payment_status, \
     discount_bps, shipping_fee_cents, total_override_cents, total_cents, version, \
     created_at, updated_at";

const LINE_COLUMNS: &str =
    "id, order_id, product_id, batch_id, quantity, unit_price_cents, created_at";

/// Read access to orders.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    pub async fn get(&self, id: &OrderId) -> DbResult<Option<Order>> {
        fetch_order(&self.pool, id).await
    }

    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = ?1"
        ))
        .bind(order_number.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    /// Lines in the order they were created.
    pub async fn lines(&self, id: &OrderId) -> DbResult<Vec<OrderLine>> {
        fetch_lines(&self.pool, id).await
    }

    pub async fn get_with_lines(&self, id: &OrderId) -> DbResult<Option<OrderWithLines>> {
        let Some(order) = self.get(id).await? else {
            return Ok(None);
        };
        let lines = self.lines(id).await?;
        Ok(Some(OrderWithLines { order, lines }))
    }

    /// Newest orders first, optionally filtered by status.
    pub async fn list(&self, status: Option<OrderStatus>, page: PageRequest) -> DbResult<Page<Order>> {
        validate_page(&page)?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE (?1 IS NULL OR status = ?1)")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        let items = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE (?1 IS NULL OR status = ?1) \
             ORDER BY created_at DESC, order_number DESC LIMIT ?2 OFFSET ?3"
        ))
        .bind(status)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            offset: page.offset,
            limit: page.limit,
            total: total as u64,
        })
    }
}

pub(crate) async fn fetch_order<'c, E>(executor: E, id: &OrderId) -> DbResult<Option<Order>>
where
    E: SqliteExecutor<'c>,
{
    let order = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(order)
}

pub(crate) async fn fetch_lines<'c, E>(executor: E, id: &OrderId) -> DbResult<Vec<OrderLine>>
where
    E: SqliteExecutor<'c>,
{
    let lines = sqlx::query_as::<_, OrderLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = ?1 ORDER BY line_no"
    ))
    .bind(id)
    .fetch_all(executor)
    .await?;

    Ok(lines)
}

// =============================================================================
// Writes (transaction-bound)
// =============================================================================

/// Draws the next order number from the sequence table. A rolled-back
/// transaction returns its number to the sequence.
pub(crate) async fn next_order_number(conn: &mut SqliteConnection) -> DbResult<String> {
    let result = sqlx::query("INSERT INTO order_number_seq (created_at) VALUES (?1)")
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

    Ok(format_order_number(result.last_insert_rowid()))
}

/// Order header fields shared by `create_order` and `place_order`.
#[derive(Debug, Clone)]
pub(crate) struct OrderHeader<'a> {
    pub order_number: &'a str,
    pub customer_id: &'a CustomerId,
    pub actor_id: &'a ActorId,
    pub discount_bps: u32,
    pub shipping_fee_cents: i64,
    pub total_override_cents: Option<i64>,
    pub total_cents: i64,
}

/// Inserts a draft order and its lines.
pub(crate) async fn insert_order(
    conn: &mut SqliteConnection,
    header: &OrderHeader<'_>,
    lines: &[NewOrderLine],
) -> DbResult<OrderWithLines> {
    let id = OrderId::generate();
    let now = Utc::now();

    debug!(order_number = header.order_number, lines = lines.len(), "Inserting order");

    let order = sqlx::query_as::<_, Order>(&format!(
        r#"
        INSERT INTO orders (
            id, order_number, customer_id, actor_id, status, payment_status,
            discount_bps, shipping_fee_cents, total_override_cents, total_cents,
            version, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(&id)
    .bind(header.order_number)
    .bind(header.customer_id)
    .bind(header.actor_id)
    .bind(OrderStatus::Draft)
    .bind(PaymentStatus::Unpaid)
    .bind(header.discount_bps)
    .bind(header.shipping_fee_cents)
    .bind(header.total_override_cents)
    .bind(header.total_cents)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let mut inserted = Vec::with_capacity(lines.len());
    for (line_no, line) in lines.iter().enumerate() {
        let row = sqlx::query_as::<_, OrderLine>(&format!(
            r#"
            INSERT INTO order_lines (
                id, order_id, line_no, product_id, batch_id,
                quantity, unit_price_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING {LINE_COLUMNS}
            "#
        ))
        .bind(OrderLineId::generate())
        .bind(&order.id)
        .bind(line_no as i64 + 1)
        .bind(&line.product_id)
        .bind(&line.batch_id)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        inserted.push(row);
    }

    Ok(OrderWithLines {
        order,
        lines: inserted,
    })
}

/// Takes the write lock on an order row.
///
/// Must be the first statement of a transition's transaction so that the
/// status read after it cannot be stale.
pub(crate) async fn claim(conn: &mut SqliteConnection, id: &OrderId) -> DbResult<()> {
    let result = sqlx::query("UPDATE orders SET version = version + 1, updated_at = ?2 WHERE id = ?1")
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::OrderNotFound(id.clone()).into());
    }

    Ok(())
}

/// Compare-and-set of the order status.
///
/// `payment_status` is left unchanged when `None`.
pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    id: &OrderId,
    expected: OrderStatus,
    new_status: OrderStatus,
    payment_status: Option<PaymentStatus>,
) -> DbResult<Order> {
    let order = sqlx::query_as::<_, Order>(&format!(
        r#"
        UPDATE orders
        SET status = ?3,
            payment_status = COALESCE(?4, payment_status),
            updated_at = ?5
        WHERE id = ?1 AND status = ?2
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(expected)
    .bind(new_status)
    .bind(payment_status)
    .bind(Utc::now())
    .fetch_optional(&mut *conn)
    .await?;

    order.ok_or_else(|| {
        DbError::Contention(format!(
            "order {id} left status {expected} before it could move to {new_status}"
        ))
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
