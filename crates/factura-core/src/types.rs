//! # Domain Types
//!
//! Rows the numbering core reads and writes.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │     Store       │   │    Invoice      │   │  SequenceCounter    │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  id             │◄──│  store_id (FK)  │   │  store_id (0=none)  │   │
//! │  │  name           │   │  number         │   │  year, month        │   │
//! │  └─────────────────┘   │  created_at     │   │  last_value         │   │
//! │                        └─────────────────┘   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot Pattern
//! `Invoice::number` is computed once from the store name at creation time.
//! Renaming the store later never rewrites existing numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::number::InvoiceNumber;
use crate::period::{Period, SequenceScope};

// =============================================================================
// Store
// =============================================================================

/// A tenant sub-unit owning invoices. Read-only input for numbering.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Store {
    pub id: i64,

    /// Display name, source of the store tag.
    pub name: String,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Invoice
// =============================================================================

/// A tenant-scoped billing document.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Invoice {
    pub id: i64,

    /// Owning store; `None` on legacy rows.
    pub store_id: Option<i64>,

    /// `YYYY-MM-TAG-NNNN`. Empty only on legacy rows awaiting repair.
    pub number: String,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// Business payload as JSON text (lines, totals, customer...).
    pub payload: Option<String>,
}

impl Invoice {
    /// Parses the stored number, if it is well formed.
    pub fn parsed_number(&self) -> Option<InvoiceNumber> {
        InvoiceNumber::parse(&self.number).ok()
    }

    /// Decodes the business payload.
    pub fn payload_value(&self) -> Result<Option<serde_json::Value>, serde_json::Error> {
        self.payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
    }
}

// =============================================================================
// Sequence Counter
// =============================================================================

/// Persistent counter of the last NNNN handed out in a scope.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SequenceCounter {
    pub id: i64,

    /// Store key; `0` is the store-less sentinel scope.
    pub store_id: i64,

    pub year: i32,

    pub month: u32,

    /// Last assigned value, `0` for a freshly created row.
    pub last_value: i64,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl SequenceCounter {
    /// The scope this row counts for.
    pub fn scope(&self) -> Option<SequenceScope> {
        let period = Period::new(self.year, self.month).ok()?;
        let store_id = (self.store_id != crate::UNASSIGNED_STORE_KEY).then_some(self.store_id);
        Some(SequenceScope::new(store_id, period))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
