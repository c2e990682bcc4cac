//! # Movement Repository
//!
//! The append-only audit trail of every ledger mutation.
//!
//! There is no update or delete here, and the schema's triggers reject
//! both, so a committed movement can never change.

use chrono::Utc;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use stockwell_core::ledger::MovementContext;
use stockwell_core::validation::{validate_date_range, validate_page};
use stockwell_core::{
    BatchId, LedgerOperation, MovementId, MovementLogEntry, MovementQuery, MovementScope, OrderId,
    Page, ProductId,
};

const MOVEMENT_COLUMNS: &str = "seq, id, batch_id, product_id, movement_type, quantity, \
     operation, reason, actor_id, order_id, created_at";

/// Read access to the movement log.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    /// One page of movements for a batch or product, in append order.
    ///
    /// ## Arguments
    /// * `query.from` - inclusive lower bound on `created_at`
    /// * `query.to` - exclusive upper bound on `created_at`
    pub async fn history(&self, query: &MovementQuery) -> DbResult<Page<MovementLogEntry>> {
        validate_page(&query.page)?;
        validate_date_range(query.from, query.to)?;

        let (column, key) = match &query.scope {
            MovementScope::Batch(id) => ("batch_id", id.as_str()),
            MovementScope::Product(id) => ("product_id", id.as_str()),
        };
        let filter = format!(
            "{column} = ?1 AND (?2 IS NULL OR created_at >= ?2) AND (?3 IS NULL OR created_at < ?3)"
        );

        debug!(scope = column, key, offset = query.page.offset, limit = query.page.limit, "Loading movement history");

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM movements WHERE {filter}"))
            .bind(key)
            .bind(query.from)
            .bind(query.to)
            .fetch_one(&self.pool)
            .await?;

        let items = sqlx::query_as::<_, MovementLogEntry>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE {filter} ORDER BY seq LIMIT ?4 OFFSET ?5"
        ))
        .bind(key)
        .bind(query.from)
        .bind(query.to)
        .bind(query.page.limit)
        .bind(query.page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            offset: query.page.offset,
            limit: query.page.limit,
            total: total as u64,
        })
    }

    /// Every movement of one batch, in append order.
    pub async fn all_for_batch(&self, batch_id: &BatchId) -> DbResult<Vec<MovementLogEntry>> {
        fetch_for_batch(&self.pool, batch_id).await
    }

    /// Every movement caused by one order's transitions.
    pub async fn for_order(&self, order_id: &OrderId) -> DbResult<Vec<MovementLogEntry>> {
        let movements = sqlx::query_as::<_, MovementLogEntry>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE order_id = ?1 ORDER BY seq"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movements")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

pub(crate) async fn fetch_for_batch<'c, E>(executor: E, batch_id: &BatchId) -> DbResult<Vec<MovementLogEntry>>
where
    E: SqliteExecutor<'c>,
{
    let movements = sqlx::query_as::<_, MovementLogEntry>(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE batch_id = ?1 ORDER BY seq"
    ))
    .bind(batch_id)
    .fetch_all(executor)
    .await?;

    Ok(movements)
}

/// Appends one movement inside the caller's transaction.
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    batch_id: &BatchId,
    product_id: &ProductId,
    operation: LedgerOperation,
    qty: i64,
    ctx: &MovementContext,
) -> DbResult<MovementLogEntry> {
    let movement = sqlx::query_as::<_, MovementLogEntry>(&format!(
        r#"
        INSERT INTO movements (
            id, batch_id, product_id, movement_type, quantity,
            operation, reason, actor_id, order_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        RETURNING {MOVEMENT_COLUMNS}
        "#
    ))
    .bind(MovementId::generate())
    .bind(batch_id)
    .bind(product_id)
    .bind(operation.movement_type())
    .bind(operation.signed_quantity(qty))
    .bind(operation)
    .bind(&ctx.reason)
    .bind(&ctx.actor_id)
    .bind(&ctx.order_id)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    Ok(movement)
}

// =============================================================================
// Unit Tests
// =============================================================================
