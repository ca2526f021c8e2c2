//! # Maintenance Module
//!
//! Migration-time entry points. Both are idempotent and meant to run once
//! per environment, in this order, with live allocation quiesced.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  migrations ──► reconcile_sequence_index() ──► repair_invoice_numbers() │
//! │                 (schema: counter uniqueness)   (data: invoice numbers)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod reconcile;
pub mod repair;

pub use reconcile::{
    reconcile_with, DropOutcome, IndexOrigin, ReconcileReport, SchemaDialect, SqliteDialect,
    UniqueIndex,
};
pub use repair::{repair_invoice_numbers, RepairReport};

use crate::error::DbResult;
use crate::Database;

/// Reconciles the counter table of `db` through the SQLite dialect.
pub async fn reconcile_sequence_index(db: &Database) -> DbResult<ReconcileReport> {
    reconcile_with(&SqliteDialect::new(db.pool().clone())).await
}
