//! # Invoice Numbers
//!
//! Human-readable invoice identifiers of shape `YYYY-MM-TAG-NNNN`.
//!
//! ## Format
//! ```text
//!   2024 - 03 - BOUTIQ - 0007
//!   ────   ──   ──────   ────
//!    │     │      │       └── counter within (store, year, month), 4 digits
//!    │     │      └────────── store tag, 1..6 of [A-Z0-9]
//!    │     └───────────────── month, 01..12
//!    └─────────────────────── year, 4 digits
//! ```
//!
//! Parsing a number and formatting it again yields the identical string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult, NumberFormatError};
use crate::period::Period;
use crate::tag::StoreTag;
use crate::MAX_SEQUENCE;

/// A composed invoice number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber {
    period: Period,
    tag: StoreTag,
    sequence: i64,
}

impl InvoiceNumber {
    /// Composes a number, rejecting counters outside `1..=9999`.
    pub fn new(period: Period, tag: StoreTag, sequence: i64) -> CoreResult<Self> {
        if sequence > MAX_SEQUENCE {
            return Err(CoreError::SequenceExhausted {
                scope: format!("{} {}", tag, period),
                value: sequence,
                max: MAX_SEQUENCE,
            });
        }
        if sequence < 1 {
            return Err(CoreError::Validation(
                crate::error::ValidationError::OutOfRange {
                    field: "sequence".to_string(),
                    min: 1,
                    max: MAX_SEQUENCE,
                },
            ));
        }
        Ok(InvoiceNumber {
            period,
            tag,
            sequence,
        })
    }

    /// Parses `YYYY-MM-TAG-NNNN`.
    pub fn parse(s: &str) -> Result<Self, NumberFormatError> {
        let parts: Vec<&str> = s.split('-').collect();
        let [year, month, tag, sequence] = parts.as_slice() else {
            return Err(NumberFormatError::PartCount(parts.len()));
        };

        let year = parse_digits(year, 4).ok_or_else(|| NumberFormatError::Year(year.to_string()))?;
        let month_value = parse_digits(month, 2)
            .filter(|m| (1..=12).contains(m))
            .ok_or_else(|| NumberFormatError::Month(month.to_string()))?;
        let tag = StoreTag::parse(tag)?;
        let sequence = parse_digits(sequence, 4)
            .filter(|n| *n >= 1)
            .ok_or_else(|| NumberFormatError::Sequence(sequence.to_string()))?;

        let period = Period::new(year as i32, month_value as u32)
            .map_err(|_| NumberFormatError::Month(month.to_string()))?;

        Ok(InvoiceNumber {
            period,
            tag,
            sequence: sequence as i64,
        })
    }

    #[inline]
    pub fn period(&self) -> Period {
        self.period
    }

    #[inline]
    pub fn tag(&self) -> &StoreTag {
        &self.tag
    }

    #[inline]
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// The `YYYY-MM-TAG-` prefix shared by every number of a tag and period.
    pub fn prefix(period: Period, tag: &StoreTag) -> String {
        format!("{}-{}-", period, tag)
    }
}

/// Parses an ASCII digit string of exactly `width` characters.
fn parse_digits(s: &str, width: usize) -> Option<u32> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{:04}", self.period, self.tag, self.sequence)
    }
}

impl FromStr for InvoiceNumber {
    type Err = NumberFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceNumber::parse(s)
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = NumberFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InvoiceNumber::parse(&value)
    }
}

impl From<InvoiceNumber> for String {
    fn from(number: InvoiceNumber) -> Self {
        number.to_string()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn march() -> Period {
        Period::new(2024, 3).unwrap()
    }

    #[test]
    fn test_compose() {
        let number = InvoiceNumber::new(march(), StoreTag::from_name("storeA"), 1).unwrap();
        assert_eq!(number.to_string(), "2024-03-STOREA-0001");

        let number = InvoiceNumber::new(
            Period::new(2024, 1).unwrap(),
            StoreTag::sentinel(),
            42,
        )
        .unwrap();
        assert!(number.to_string().starts_with("2024-01-BTQ001-"));
    }

    #[test]
    fn test_overflow_is_rejected() {
        assert!(InvoiceNumber::new(march(), StoreTag::sentinel(), 9999).is_ok());
        let err = InvoiceNumber::new(march(), StoreTag::sentinel(), 10000).unwrap_err();
        assert!(matches!(err, CoreError::SequenceExhausted { value: 10000, .. }));
        assert!(InvoiceNumber::new(march(), StoreTag::sentinel(), 0).is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        for s in ["2024-03-BOUTIQ-0007", "1999-12-A-9999", "2024-06-BTQ001-0001"] {
            let number: InvoiceNumber = s.parse().unwrap();
            assert_eq!(number.to_string(), s);
        }

        let number = InvoiceNumber::parse("2024-03-BOUTIQ-0007").unwrap();
        assert_eq!(number.period(), march());
        assert_eq!(number.tag().as_str(), "BOUTIQ");
        assert_eq!(number.sequence(), 7);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(InvoiceNumber::parse("X"), Err(NumberFormatError::PartCount(1)));
        assert_eq!(InvoiceNumber::parse(""), Err(NumberFormatError::PartCount(1)));
        assert!(matches!(
            InvoiceNumber::parse("24-03-ABC-0001"),
            Err(NumberFormatError::Year(_))
        ));
        assert!(matches!(
            InvoiceNumber::parse("2024-13-ABC-0001"),
            Err(NumberFormatError::Month(_))
        ));
        assert!(matches!(
            InvoiceNumber::parse("2024-00-ABC-0001"),
            Err(NumberFormatError::Month(_))
        ));
        assert!(matches!(
            InvoiceNumber::parse("2024-03-abc-0001"),
            Err(NumberFormatError::Tag(_))
        ));
        assert!(matches!(
            InvoiceNumber::parse("2024-03-ABC-10000"),
            Err(NumberFormatError::Sequence(_))
        ));
        assert!(matches!(
            InvoiceNumber::parse("2024-03-ABC-0000"),
            Err(NumberFormatError::Sequence(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let number = InvoiceNumber::parse("2024-03-BOUTIQ-0007").unwrap();
        let json = serde_json::to_string(&number).unwrap();
        assert_eq!(json, "\"2024-03-BOUTIQ-0007\"");

        let back: InvoiceNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, number);
        assert!(serde_json::from_str::<InvoiceNumber>("\"nope\"").is_err());
    }

    #[test]
    fn test_prefix() {
        assert_eq!(
            InvoiceNumber::prefix(march(), &StoreTag::sentinel()),
            "2024-03-BTQ001-"
        );
    }
}
