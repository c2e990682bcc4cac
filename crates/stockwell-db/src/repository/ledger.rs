//! # Ledger Repository
//!
//! Per-batch stock buckets, and the only code that changes them.
//!
//! ## Mutation Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  move_shelf_to_reserved(batch, 3)            (inside the caller's tx)   │
//! │                                                                         │
//! │  1. qty > 0?                      no ──► Validation, no SQL             │
//! │  2. UPDATE inventory_ledger                                             │
//! │       SET on_shelf = on_shelf - 3, reserved = reserved + 3, version+1   │
//! │       WHERE batch_id = ? AND on_shelf - 3 >= 0 AND reserved + 3 >= 0    │
//! │       RETURNING *                                                       │
//! │  3. no row? ──► load entry: missing   ──► BatchNotFound                 │
//! │                             present   ──► InsufficientShelfStock        │
//! │  4. INSERT movement (out, -3, shelf_to_reserved)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The conditional UPDATE is the authoritative stock check: two writers can
//! never both take the last unit. The mutation functions are crate-private
//! and take the transaction's connection, so a ledger change and its
//! movement always commit or roll back together.

use chrono::Utc;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::movement;
use stockwell_core::fulfillment::LedgerEffect;
use stockwell_core::ledger::{check_quantity, MovementContext, ReturnSource};
use stockwell_core::{
    BatchId, CoreError, LedgerEntry, LedgerOperation, MovementLogEntry, ProductId, StockSummary,
};

const LEDGER_COLUMNS: &str = "batch_id, quantity_on_shelf, quantity_reserved, version, updated_at";

/// Read access to ledger entries.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    pub async fn get(&self, batch_id: &BatchId) -> DbResult<Option<LedgerEntry>> {
        fetch_entry(&self.pool, batch_id).await
    }

    /// Ledger entries of every batch of a product, FEFO order.
    pub async fn for_product(&self, product_id: &ProductId) -> DbResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT l.batch_id, l.quantity_on_shelf, l.quantity_reserved, l.version, l.updated_at
            FROM inventory_ledger l
            INNER JOIN batches b ON b.id = l.batch_id
            WHERE b.product_id = ?1
            ORDER BY b.expiry_date, b.received_seq
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Bucket totals over all batches of a product.
    pub async fn stock_summary(&self, product_id: &ProductId) -> DbResult<StockSummary> {
        let (batch_count, on_shelf, reserved): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(l.batch_id),
                COALESCE(SUM(l.quantity_on_shelf), 0),
                COALESCE(SUM(l.quantity_reserved), 0)
            FROM inventory_ledger l
            INNER JOIN batches b ON b.id = l.batch_id
            WHERE b.product_id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(StockSummary {
            product_id: product_id.clone(),
            batch_count,
            quantity_on_shelf: on_shelf,
            quantity_reserved: reserved,
        })
    }
}

pub(crate) async fn fetch_entry<'c, E>(executor: E, batch_id: &BatchId) -> DbResult<Option<LedgerEntry>>
where
    E: SqliteExecutor<'c>,
{
    let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
        "SELECT {LEDGER_COLUMNS} FROM inventory_ledger WHERE batch_id = ?1"
    ))
    .bind(batch_id)
    .fetch_optional(executor)
    .await?;

    Ok(entry)
}

// =============================================================================
// Mutations (transaction-bound)
// =============================================================================

/// Applies one primitive to a batch and appends its movement.
///
/// `product_id` is recorded on the movement for product-scoped history.
pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    batch_id: &BatchId,
    product_id: &ProductId,
    operation: LedgerOperation,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<(LedgerEntry, MovementLogEntry)> {
    check_quantity(qty)?;

    let (shelf_delta, reserved_delta) = operation.bucket_deltas(qty);
    let now = Utc::now();

    let updated = sqlx::query_as::<_, LedgerEntry>(&format!(
        r#"
        UPDATE inventory_ledger
        SET quantity_on_shelf = quantity_on_shelf + ?2,
            quantity_reserved = quantity_reserved + ?3,
            version = version + 1,
            updated_at = ?4
        WHERE batch_id = ?1
          AND quantity_on_shelf + ?2 >= 0
          AND quantity_reserved + ?3 >= 0
        RETURNING {LEDGER_COLUMNS}
        "#
    ))
    .bind(batch_id)
    .bind(shelf_delta)
    .bind(reserved_delta)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    let entry = match updated {
        Some(entry) => entry,
        None => return Err(explain_rejection(conn, batch_id, operation, qty).await),
    };

    let movement = movement::append(conn, batch_id, product_id, operation, qty, ctx).await?;

    debug!(
        batch_id = %batch_id,
        operation = %operation,
        qty,
        on_shelf = entry.quantity_on_shelf,
        reserved = entry.quantity_reserved,
        "Ledger mutation applied"
    );

    Ok((entry, movement))
}

/// Turns a conditional UPDATE that matched nothing into the precise error.
async fn explain_rejection(
    conn: &mut SqliteConnection,
    batch_id: &BatchId,
    operation: LedgerOperation,
    qty: i64,
) -> DbError {
    let current = match fetch_entry(&mut *conn, batch_id).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return CoreError::BatchNotFound(batch_id.clone()).into(),
        Err(err) => return err,
    };

    // The pure model names the bucket that would have gone negative.
    match current.apply(operation, qty, Utc::now()) {
        Err(err) => err.into(),
        Ok(_) => DbError::Internal(format!(
            "conditional ledger update rejected {operation} of {qty} on batch {batch_id} \
             although the entry allows it"
        )),
    }
}

/// Initial stock of a newly received batch.
pub(crate) async fn receive(
    conn: &mut SqliteConnection,
    batch_id: &BatchId,
    product_id: &ProductId,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<(LedgerEntry, MovementLogEntry)> {
    apply(conn, batch_id, product_id, LedgerOperation::Receive, qty, ctx).await
}

/// Reserve shelf stock for an open order.
pub(crate) async fn move_shelf_to_reserved(
    conn: &mut SqliteConnection,
    batch_id: &BatchId,
    product_id: &ProductId,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<(LedgerEntry, MovementLogEntry)> {
    apply(conn, batch_id, product_id, LedgerOperation::ShelfToReserved, qty, ctx).await
}

/// A reservation becomes a sale.
pub(crate) async fn move_reserved_to_sold(
    conn: &mut SqliteConnection,
    batch_id: &BatchId,
    product_id: &ProductId,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<(LedgerEntry, MovementLogEntry)> {
    apply(conn, batch_id, product_id, LedgerOperation::ReservedToSold, qty, ctx).await
}

/// Direct sale from the shelf.
pub(crate) async fn move_shelf_to_sold(
    conn: &mut SqliteConnection,
    batch_id: &BatchId,
    product_id: &ProductId,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<(LedgerEntry, MovementLogEntry)> {
    apply(conn, batch_id, product_id, LedgerOperation::ShelfToSold, qty, ctx).await
}

/// Puts units back on the shelf, either from a reservation or after a sale.
pub(crate) async fn return_to_shelf(
    conn: &mut SqliteConnection,
    batch_id: &BatchId,
    product_id: &ProductId,
    qty: i64,
    from: ReturnSource,
    ctx: &MovementContext,
) -> DbResult<(LedgerEntry, MovementLogEntry)> {
    apply(conn, batch_id, product_id, from.operation(), qty, ctx).await
}

/// Dispatches a planned transition effect to its primitive.
pub(crate) async fn apply_effect(
    conn: &mut SqliteConnection,
    effect: &LedgerEffect,
    ctx: &MovementContext,
) -> DbResult<(LedgerEntry, MovementLogEntry)> {
    let LedgerEffect {
        batch_id,
        product_id,
        quantity,
        operation,
        ..
    } = effect;
    let qty = *quantity;

    match operation {
        LedgerOperation::ShelfToReserved => move_shelf_to_reserved(conn, batch_id, product_id, qty, ctx).await,
        LedgerOperation::ReservedToSold => move_reserved_to_sold(conn, batch_id, product_id, qty, ctx).await,
        LedgerOperation::ShelfToSold => move_shelf_to_sold(conn, batch_id, product_id, qty, ctx).await,
        LedgerOperation::ReservedToShelf => {
            return_to_shelf(conn, batch_id, product_id, qty, ReturnSource::Reserved, ctx).await
        }
        LedgerOperation::SoldToShelf => {
            return_to_shelf(conn, batch_id, product_id, qty, ReturnSource::Sold, ctx).await
        }
        LedgerOperation::Receive => receive(conn, batch_id, product_id, qty, ctx).await,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::batch::insert_batch;
    use chrono::NaiveDate;
    use stockwell_core::{ActorId, MovementType, NewBatch};

    async fn setup() -> (Database, BatchId, ProductId) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db.products().create("MILK-1L", "Whole Milk 1L").await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let batch = insert_batch(
            &mut conn,
            &NewBatch {
                batch_code: "MILK-A".to_string(),
                product_id: product.id.clone(),
                expiry_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                unit_cost_cents: 80,
                unit_price_cents: 120,
                quantity: 10,
            },
            &ActorId::from("clerk"),
        )
        .await
        .unwrap();
        drop(conn);

        (db, batch.id, product.id)
    }

    fn ctx() -> MovementContext {
        MovementContext::new(ActorId::from("clerk"), "test")
    }

    #[tokio::test]
    async fn test_mutation_writes_entry_and_movement() {
        let (db, batch, product) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        receive(&mut conn, &batch, &product, 10, &ctx()).await.unwrap();
        let (entry, movement) = move_shelf_to_reserved(&mut conn, &batch, &product, 4, &ctx())
            .await
            .unwrap();

        assert_eq!((entry.quantity_on_shelf, entry.quantity_reserved), (6, 4));
        assert_eq!(entry.version, 2);
        assert_eq!(movement.movement_type, MovementType::Out);
        assert_eq!(movement.quantity, -4);
        assert_eq!(movement.operation, LedgerOperation::ShelfToReserved);
        assert_eq!(movement.product_id, product);
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_typed_and_writes_nothing() {
        let (db, batch, product) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        receive(&mut conn, &batch, &product, 2, &ctx()).await.unwrap();

        let err = move_shelf_to_sold(&mut conn, &batch, &product, 3, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientShelfStock { available: 2, requested: 3, .. })
        ));

        let err = return_to_shelf(&mut conn, &batch, &product, 1, ReturnSource::Reserved, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InsufficientReservedStock { .. })));

        drop(conn);
        let entry = db.ledger().get(&batch).await.unwrap().unwrap();
        assert_eq!((entry.quantity_on_shelf, entry.quantity_reserved), (2, 0));
        assert_eq!(db.movements().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_batch_and_bad_quantity() {
        let (db, _batch, product) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let err = receive(&mut conn, &BatchId::from("ghost"), &product, 1, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::BatchNotFound(_))));

        let err = receive(&mut conn, &BatchId::from("ghost"), &product, 0, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stock_summary() {
        let (db, batch, product) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        receive(&mut conn, &batch, &product, 10, &ctx()).await.unwrap();
        move_shelf_to_reserved(&mut conn, &batch, &product, 3, &ctx()).await.unwrap();
        drop(conn);

        let summary = db.ledger().stock_summary(&product).await.unwrap();
        assert_eq!(summary.batch_count, 1);
        assert_eq!(summary.quantity_on_shelf, 7);
        assert_eq!(summary.quantity_reserved, 3);
        assert_eq!(summary.quantity_on_hand(), 10);

        let empty = db.ledger().stock_summary(&ProductId::from("none")).await.unwrap();
        assert_eq!(empty.batch_count, 0);
        assert_eq!(empty.quantity_on_hand(), 0);
    }
}
