//! # Repository Module
//!
//! Database repositories for the Stockwell ledger.
//!
//! ## Read Side vs Write Side
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Read side (pub, pool-backed)          Write side (pub(crate), tx-bound)│
//! │                                                                         │
//! │  db.batches().availability(..)         batch::insert_batch(conn, ..)    │
//! │  db.ledger().get(batch_id)             ledger::move_shelf_to_reserved(..)│
//! │  db.movements().history(query)         movement::append(conn, ..)       │
//! │  db.orders().get_with_lines(id)        order::claim / set_status(..)    │
//! │       │                                       ▲                         │
//! │       ▼                                       │                         │
//! │   SqlitePool                         FulfillmentService transaction     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock only changes through the write side, and the write side is only
//! reachable from [`crate::fulfillment::FulfillmentService`], so every
//! ledger change lands in the same transaction as its movement.
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Catalog entries and the active flag
//! - [`BatchRepository`](batch::BatchRepository) - Received lots and FEFO availability
//! - [`LedgerRepository`](ledger::LedgerRepository) - Per-batch buckets and stock summaries
//! - [`MovementRepository`](movement::MovementRepository) - Append-only movement log
//! - [`OrderRepository`](order::OrderRepository) - Orders and their lines

pub mod batch;
pub mod ledger;
pub mod movement;
pub mod order;
pub mod product;
