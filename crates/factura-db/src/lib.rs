//! # factura-db: Database Layer for Factura
//!
//! SQLite persistence for invoice numbering: sequence counters, the number
//! allocator, invoice creation and the migration-time maintenance steps.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Factura Numbering Data Flow                        │
//! │                                                                         │
//! │  Invoice create hook / factura-maint                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   factura-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │ Maintenance  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │              │  │   │
//! │  │   │               │    │ InvoiceRepo   │    │ reconcile    │  │   │
//! │  │   │ SqlitePool    │◄───│ StoreRepo     │    │ repair       │  │   │
//! │  │   │ Migrations    │    │ SequenceStore │    │              │  │   │
//! │  │   └───────────────┘    └───────┬───────┘    └──────────────┘  │   │
//! │  │                                │                               │   │
//! │  │                        NumberAllocator                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   SQLite: stores, invoices, sequence_counters                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`config`] - TOML / environment configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Stores, invoices, sequence counters
//! - [`numbering`] - `YYYY-MM-TAG-NNNN` allocation
//! - [`maintenance`] - Sequence-index reconciliation and invoice repair
//!
//! ## Usage
//!
//! ```rust,ignore
//! use factura_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("factura.db")).await?;
//!
//! let store = db.stores().insert("Boutique Centre-Ville").await?;
//! let invoice = db.invoices().create_invoice(Some(store.id), Utc::now(), None).await?;
//! // invoice.number == "2024-03-BOUTIQ-0001"
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod maintenance;
pub mod migrations;
pub mod numbering;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{FacturaConfig, RepairPeriod, RepairSettings, RetryPolicy};
pub use error::{DbError, DbResult};
pub use maintenance::{
    reconcile_sequence_index, repair_invoice_numbers, ReconcileReport, RepairReport,
};
pub use numbering::NumberAllocator;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::invoice::InvoiceRepository;
pub use repository::sequence::SequenceStore;
pub use repository::store::StoreRepository;
