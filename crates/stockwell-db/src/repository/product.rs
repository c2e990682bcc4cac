//! # Product Repository
//!
//! The minimal catalog the ledger consults: a product exists and is active,
//! or allocation and receiving refuse it.
//!
//! ## Key Operations
//! - Create (validated SKU + name)
//! - Lookup by id or SKU
//! - Activate / deactivate (products are never deleted)

use chrono::Utc;
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use stockwell_core::validation::{validate_product_name, validate_sku};
use stockwell_core::{CoreError, Product, ProductId};

const PRODUCT_COLUMNS: &str = "id, sku, name, is_active, created_at, updated_at";

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// let milk = repo.create("MILK-1L", "Whole Milk 1L").await?;
/// let same = repo.get_by_sku("MILK-1L").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Creates an active product.
    ///
    /// ## Returns
    /// * `Ok(Product)` - Inserted product
    /// * `Err(DbError::Domain(Validation))` - bad SKU or name
    /// * `Err(DbError::UniqueViolation)` - SKU already exists
    pub async fn create(&self, sku: &str, name: &str) -> DbResult<Product> {
        validate_sku(sku)?;
        validate_product_name(name)?;

        let now = Utc::now();
        let product = Product {
            id: ProductId::generate(),
            sku: sku.trim().to_string(),
            name: name.trim().to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        debug!(sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &product.sku),
            other => other,
        })?;

        Ok(product)
    }

    /// Gets a product by its ID, active or not.
    pub async fn get_by_id(&self, id: &ProductId) -> DbResult<Option<Product>> {
        fetch_product(&self.pool, id).await
    }

    /// Gets a product by SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?1"
        ))
        .bind(sku.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Lists active products sorted by SKU.
    pub async fn list_active(&self, limit: u32) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY sku LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Activates or deactivates a product.
    ///
    /// Deactivated products keep their batches and history but can no
    /// longer be received or allocated.
    pub async fn set_active(&self, id: &ProductId, active: bool) -> DbResult<()> {
        debug!(id = %id, active, "Setting product active flag");

        let result = sqlx::query("UPDATE products SET is_active = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ProductNotFound(id.clone()).into());
        }

        Ok(())
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

pub(crate) async fn fetch_product<'c, E>(executor: E, id: &ProductId) -> DbResult<Option<Product>>
where
    E: SqliteExecutor<'c>,
{
    let product = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(product)
}

/// Loads a product that may take part in stock operations.
///
/// Missing and inactive products are both `ProductNotFound`.
pub(crate) async fn require_active<'c, E>(executor: E, id: &ProductId) -> DbResult<Product>
where
    E: SqliteExecutor<'c>,
{
    match fetch_product(executor, id).await? {
        Some(product) if product.is_active => Ok(product),
        _ => Err(CoreError::ProductNotFound(id.clone()).into()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
