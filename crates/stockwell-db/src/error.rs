//! # Database Error Types
//!
//! Error types for database operations and the fulfillment service.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)          CoreError (stockwell-core)         │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError (this module) ◄──────────── DbError::Domain                    │
//! │       │                                                                 │
//! │       ├── is_retryable() == true   → Contention, PoolExhausted          │
//! │       │                              (RetryPolicy runs it again)        │
//! │       ▼                                                                 │
//! │  CLI (anyhow) ← message + exit code                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockwell_core::{CoreError, ValidationError};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting a duplicate SKU
    /// - Receiving a batch code twice
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    ///
    /// ## When This Occurs
    /// - A CHECK constraint fired
    /// - An append-only trigger rejected an UPDATE/DELETE
    /// - Any other runtime SQL error
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// The database was busy or locked by another writer.
    ///
    /// ## When This Occurs
    /// ```text
    /// tx A: UPDATE orders ... (holds the write lock)
    /// tx B: UPDATE orders ... waits busy_timeout ... SQLITE_BUSY
    ///                                                    │
    ///                                                    ▼
    ///                                          DbError::Contention
    /// ```
    /// Retryable. Nothing from the failed attempt was committed.
    #[error("Database contention: {0}")]
    Contention(String),

    /// Pool exhausted (all connections in use past the acquire timeout).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A business rule rejected the request.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether running the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Contention(_) | DbError::PoolExhausted)
    }

    /// The domain error, if this is one.
    pub fn as_domain(&self) -> Option<&CoreError> {
        match self {
            DbError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// SQLite primary result codes that mean "someone else holds the lock".
///
/// Extended codes (`SQLITE_BUSY_SNAPSHOT` = 517, `SQLITE_LOCKED_SHAREDCACHE`
/// = 262, ...) carry the primary code in their low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn is_lock_error(code: Option<&str>, message: &str) -> bool {
    let by_code = code
        .and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false);
    by_code || message.contains("database is locked") || message.contains("database table is locked")
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → busy/locked → Contention
///                               else analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let code = db_err.code();

                if is_lock_error(code.as_deref(), msg) {
                    DbError::Contention(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    // "UNIQUE constraint failed: <table>.<column>"
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use stockwell_core::{BatchId, OrderStatus};

    #[test]
    fn test_lock_detection() {
        assert!(is_lock_error(Some("5"), "database is locked"));
        assert!(is_lock_error(Some("517"), "database is locked"));
        assert!(is_lock_error(Some("262"), "database table is locked"));
        assert!(is_lock_error(None, "database is locked"));
        assert!(!is_lock_error(Some("19"), "UNIQUE constraint failed: products.sku"));
        assert!(!is_lock_error(Some("2067"), "UNIQUE constraint failed: products.sku"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(DbError::Contention("busy".to_string()).is_retryable());
        assert!(DbError::PoolExhausted.is_retryable());
        assert!(!DbError::not_found("Order", "o1").is_retryable());

        let domain: DbError = CoreError::InvalidTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Pending,
        }
        .into();
        assert!(!domain.is_retryable());
    }

    #[test]
    fn test_domain_error_is_transparent() {
        let err: DbError = CoreError::BatchNotFound(BatchId::from("b9")).into();
        assert_eq!(err.to_string(), "Batch not found: b9");
        assert!(matches!(err.as_domain(), Some(CoreError::BatchNotFound(_))));
    }

    #[test]
    fn test_pool_timeout_maps_to_pool_exhausted() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::PoolExhausted));
    }
}
