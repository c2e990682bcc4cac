//! # stockwell-db: Persistence and Transactions for Stockwell
//!
//! SQLite storage for batches, the inventory ledger, the movement log and
//! orders, plus the [`FulfillmentService`] that changes them.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockwell Data Flow                              │
//! │                                                                         │
//! │  stockwell order transition ORD-000042 shipping                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   stockwell-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐   ┌────────────────┐   ┌──────────────┐    │   │
//! │  │   │ Fulfillment   │──►│  Repositories  │   │  Migrations  │    │   │
//! │  │   │ Service       │   │ batch, ledger, │   │  (embedded)  │    │   │
//! │  │   │ + RetryPolicy │   │ movement, order│   │ 001_*.sql    │    │   │
//! │  │   └───────┬───────┘   └───────┬────────┘   └──────────────┘    │   │
//! │  │           │ plans from        │                                 │   │
//! │  │           ▼ stockwell-core    ▼                                 │   │
//! │  │   ┌─────────────────────────────────────────┐                  │   │
//! │  │   │ Database (pool.rs): SqlitePool, WAL,    │                  │   │
//! │  │   │ foreign keys, busy_timeout              │                  │   │
//! │  │   └─────────────────────────────────────────┘                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (stockwell.db)              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types and contention mapping
//! - [`retry`] - Whole-transaction retry on contention
//! - [`repository`] - Read repositories and transaction-bound writes
//! - [`fulfillment`] - The transactional service
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockwell_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("stockwell.db")).await?;
//! let service = db.fulfillment();
//!
//! let plan = service.allocate(&product_id, 8).await?;
//! let order = service.place_order(&request, OrderStatus::Pending).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fulfillment;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod retry;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use fulfillment::{FulfillmentService, LedgerAudit};
pub use pool::{Database, DbConfig};
pub use retry::RetryPolicy;

// Repository re-exports for convenience
pub use repository::batch::BatchRepository;
pub use repository::ledger::LedgerRepository;
pub use repository::movement::MovementRepository;
pub use repository::order::OrderRepository;
pub use repository::product::ProductRepository;
