//! # Batch Repository
//!
//! Received lots and the FEFO availability view over them.
//!
//! ## Availability View
//! ```text
//! batches b ⋈ inventory_ledger l
//!   WHERE b.product_id = ?  AND l.quantity_on_shelf > 0
//!     AND b.expiry_date >= ?today
//!   ORDER BY b.expiry_date, b.received_seq
//!
//!   ──► Vec<BatchAvailability> ──► stockwell_core::allocation::plan_fefo
//! ```
//!
//! Batches are inserted only by the fulfillment service's receiving
//! transaction and are never updated (a trigger enforces it).

use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use stockwell_core::allocation::BatchAvailability;
use stockwell_core::{ActorId, Batch, BatchId, NewBatch, ProductId};

const BATCH_COLUMNS: &str = "id, batch_code, product_id, expiry_date, unit_cost_cents, \
     unit_price_cents, received_quantity, received_seq, received_by, created_at";

/// Read access to received batches.
#[derive(Debug, Clone)]
pub struct BatchRepository {
    pool: SqlitePool,
}

impl BatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        BatchRepository { pool }
    }

    pub async fn get_by_id(&self, id: &BatchId) -> DbResult<Option<Batch>> {
        fetch_batch(&self.pool, id).await
    }

    pub async fn get_by_code(&self, batch_code: &str) -> DbResult<Option<Batch>> {
        let batch = sqlx::query_as::<_, Batch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE batch_code = ?1"
        ))
        .bind(batch_code.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(batch)
    }

    /// All batches of a product in FEFO order, including empty and expired
    /// ones.
    pub async fn list_for_product(&self, product_id: &ProductId) -> DbResult<Vec<Batch>> {
        let batches = sqlx::query_as::<_, Batch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE product_id = ?1 \
             ORDER BY expiry_date, received_seq"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(batches)
    }

    /// Allocatable batches of a product as of `today`.
    pub async fn availability(
        &self,
        product_id: &ProductId,
        today: NaiveDate,
    ) -> DbResult<Vec<BatchAvailability>> {
        fetch_availability(&self.pool, product_id, today).await
    }
}

pub(crate) async fn fetch_batch<'c, E>(executor: E, id: &BatchId) -> DbResult<Option<Batch>>
where
    E: SqliteExecutor<'c>,
{
    let batch = sqlx::query_as::<_, Batch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(batch)
}

pub(crate) async fn fetch_availability<'c, E>(
    executor: E,
    product_id: &ProductId,
    today: NaiveDate,
) -> DbResult<Vec<BatchAvailability>>
where
    E: SqliteExecutor<'c>,
{
    debug!(product_id = %product_id, %today, "Loading FEFO candidates");

    let rows = sqlx::query_as::<_, BatchAvailability>(
        r#"
        SELECT
            b.id AS batch_id,
            b.product_id,
            b.expiry_date,
            b.received_seq,
            l.quantity_on_shelf,
            b.unit_price_cents
        FROM batches b
        INNER JOIN inventory_ledger l ON l.batch_id = b.id
        WHERE b.product_id = ?1
          AND l.quantity_on_shelf > 0
          AND b.expiry_date >= ?2
        ORDER BY b.expiry_date, b.received_seq
        "#,
    )
    .bind(product_id)
    .bind(today)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Inserts a batch row and its empty ledger row.
///
/// Stock arrives through the ledger's `receive` afterwards so that it is
/// recorded as a movement.
pub(crate) async fn insert_batch(
    conn: &mut SqliteConnection,
    new_batch: &NewBatch,
    received_by: &ActorId,
) -> DbResult<Batch> {
    let id = BatchId::generate();
    let now = Utc::now();

    debug!(batch_code = %new_batch.batch_code, product_id = %new_batch.product_id, "Inserting batch");

    let batch = sqlx::query_as::<_, Batch>(&format!(
        r#"
        INSERT INTO batches (
            id, batch_code, product_id, expiry_date,
            unit_cost_cents, unit_price_cents, received_quantity,
            received_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        RETURNING {BATCH_COLUMNS}
        "#
    ))
    .bind(&id)
    .bind(new_batch.batch_code.trim())
    .bind(&new_batch.product_id)
    .bind(new_batch.expiry_date)
    .bind(new_batch.unit_cost_cents)
    .bind(new_batch.unit_price_cents)
    .bind(new_batch.quantity)
    .bind(received_by)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::UniqueViolation { field, .. } => DbError::duplicate(field, new_batch.batch_code.trim()),
        other => other,
    })?;

    sqlx::query(
        r#"
        INSERT INTO inventory_ledger (batch_id, quantity_on_shelf, quantity_reserved, version, updated_at)
        VALUES (?1, 0, 0, 0, ?2)
        "#,
    )
    .bind(&batch.id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(batch)
}
