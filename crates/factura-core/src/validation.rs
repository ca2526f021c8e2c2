//! # Validation Module
//!
//! Input validation for the numbering core.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: CRUD layer                                                   │
//! │  └── Store names, payload shape                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Number format, store names                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE (store_id, year, month) on sequence_counters               │
//! │  └── UNIQUE (number) on invoices, once repaired                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use factura_core::validation::validate_invoice_number;
//!
//! assert!(validate_invoice_number("2024-03-STOREA-0001").is_ok());
//! assert!(validate_invoice_number("2024-3-STOREA-1").is_err());
//! ```

use crate::error::ValidationError;
use crate::number::InvoiceNumber;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted store display name.
pub const MAX_STORE_NAME_LEN: usize = 200;

/// Validates an invoice number against `^\d{4}-(0[1-9]|1[0-2])-[A-Z0-9]{1,6}-\d{4}$`.
pub fn validate_invoice_number(number: &str) -> ValidationResult<InvoiceNumber> {
    if number.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "number".to_string(),
        });
    }

    InvoiceNumber::parse(number).map_err(|e| ValidationError::InvalidFormat {
        field: "number".to_string(),
        reason: e.to_string(),
    })
}

/// Validates a store display name.
///
/// ## Rules
/// - Must not be blank
/// - At most 200 characters
///
/// A name without any ASCII letter or digit is accepted; it simply maps to
/// the `BTQ001` tag.
pub fn validate_store_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "store name".to_string(),
        });
    }

    if name.chars().count() > MAX_STORE_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "store name".to_string(),
            max: MAX_STORE_NAME_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
