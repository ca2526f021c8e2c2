//! # factura-core: Pure Invoice Numbering Logic
//!
//! This crate holds everything about invoice numbers that can be decided
//! without touching a database.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Factura Numbering Architecture                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 CRUD layer (invoice create hook)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ allocate(store, at)                    │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ factura-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │    tag    │  │  number   │  │  period   │  │   │
//! │  │   │  Store    │  │ StoreTag  │  │ YYYY-MM-  │  │ Period    │  │   │
//! │  │   │  Invoice  │  │  BTQ001   │  │ TAG-NNNN  │  │ Scope     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  factura-db (Database Layer)                    │   │
//! │  │        sequence counters, allocator, repair, reconciliation     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Store, Invoice, SequenceCounter)
//! - [`tag`] - Store tag derivation
//! - [`number`] - `YYYY-MM-TAG-NNNN` composition and parsing
//! - [`period`] - Calendar periods, sequence scopes, clocks
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use factura_core::{InvoiceNumber, Period, StoreTag};
//!
//! let tag = StoreTag::from_name("Boutique Centre-Ville");
//! let number = InvoiceNumber::new(Period::new(2024, 3).unwrap(), tag, 7).unwrap();
//!
//! assert_eq!(number.to_string(), "2024-03-BOUTIQ-0007");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod number;
pub mod period;
pub mod tag;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, NumberFormatError, ValidationError};
pub use number::InvoiceNumber;
pub use period::{Clock, FixedClock, Period, PeriodZone, SequenceScope, SystemClock};
pub use tag::StoreTag;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Tag used when an invoice has no store (legacy rows).
pub const SENTINEL_TAG: &str = "BTQ001";

/// Maximum number of characters in a store tag.
pub const MAX_TAG_LEN: usize = 6;

/// Largest counter value that fits the four-digit NNNN field.
///
/// Allocation past this value is rejected rather than widened, so every
/// persisted number keeps the fixed `YYYY-MM-TAG-NNNN` shape.
pub const MAX_SEQUENCE: i64 = 9999;

/// Store key persisted in `sequence_counters` for the sentinel (store-less) scope.
///
/// SQLite treats NULLs as distinct in UNIQUE indexes, so a NULL store id
/// could never be protected by the composite scope index.
pub const UNASSIGNED_STORE_KEY: i64 = 0;
