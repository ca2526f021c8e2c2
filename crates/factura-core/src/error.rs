//! # Error Types
//!
//! Domain-specific error types for factura-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  factura-core errors (this file)                                       │
//! │  ├── CoreError          - General domain errors                        │
//! │  ├── NumberFormatError  - Unparseable invoice numbers                  │
//! │  └── ValidationError    - Input validation failures                    │
//! │                                                                         │
//! │  factura-db errors (separate crate)                                    │
//! │  └── DbError            - Database and allocation failures             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → API response            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core numbering errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Month outside 1..=12 or year outside the four-digit range.
    #[error("Invalid period {year}-{month}")]
    InvalidPeriod { year: i32, month: u32 },

    /// The counter for a scope has passed the four-digit NNNN field.
    ///
    /// ## When This Occurs
    /// The 10 000th invoice of a single (store, year, month) scope.
    /// Not retryable: the scope is full until the next month.
    #[error("Sequence exhausted for {scope}: {value} exceeds {max}")]
    SequenceExhausted { scope: String, value: i64, max: i64 },

    /// Invoice number could not be parsed.
    #[error("Invalid invoice number: {0}")]
    Format(#[from] NumberFormatError),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Number Format Error
// =============================================================================

/// Reasons an invoice number string does not match `YYYY-MM-TAG-NNNN`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumberFormatError {
    #[error("expected 4 '-' separated parts, found {0}")]
    PartCount(usize),

    #[error("year '{0}' is not four digits")]
    Year(String),

    #[error("month '{0}' is not 01..12")]
    Month(String),

    #[error("tag '{0}' must be 1 to 6 uppercase letters or digits")]
    Tag(String),

    #[error("sequence '{0}' is not four digits")]
    Sequence(String),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::SequenceExhausted {
            scope: "store 3 / 2024-03".to_string(),
            value: 10000,
            max: 9999,
        };
        assert_eq!(
            err.to_string(),
            "Sequence exhausted for store 3 / 2024-03: 10000 exceeds 9999"
        );
    }

    #[test]
    fn test_format_error_converts_to_core_error() {
        let core_err: CoreError = NumberFormatError::PartCount(2).into();
        assert!(matches!(core_err, CoreError::Format(_)));
        assert_eq!(
            core_err.to_string(),
            "Invalid invoice number: expected 4 '-' separated parts, found 2"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "store name".to_string(),
        };
        assert_eq!(err.to_string(), "store name is required");
    }
}
