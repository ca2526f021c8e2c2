//! # Periods and Sequence Scopes
//!
//! Invoice counters restart every calendar month, independently per store.
//!
//! ## Scope Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SequenceScope = (store id, year, month)                                │
//! │                                                                         │
//! │  store 3, 2024-03  ──► 0001, 0002, 0003 ...                             │
//! │  store 3, 2024-04  ──► 0001, 0002 ...          (month rollover)         │
//! │  store 9, 2024-03  ──► 0001 ...                (independent store)      │
//! │  no store, 2024-03 ──► 0001 ...                (BTQ001 sentinel scope)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The month is taken from a caller-supplied timestamp, converted into a
//! configured zone ([`PeriodZone`]). The timestamp's own offset never matters.

use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::UNASSIGNED_STORE_KEY;

// =============================================================================
// Period
// =============================================================================

/// A calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Creates a period, rejecting months outside 1..=12 and years that do
    /// not fit four digits.
    pub fn new(year: i32, month: u32) -> CoreResult<Self> {
        if !(0..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(CoreError::InvalidPeriod { year, month });
        }
        Ok(Period { year, month })
    }

    /// The period containing `at`, as seen from `zone`.
    pub fn containing(at: DateTime<Utc>, zone: PeriodZone) -> Self {
        let (year, month) = match zone {
            PeriodZone::Utc => (at.year(), at.month()),
            PeriodZone::Local => {
                let local = at.with_timezone(&Local);
                (local.year(), local.month())
            }
        };
        Period { year, month }
    }

    #[inline]
    pub const fn year(&self) -> i32 {
        self.year
    }

    #[inline]
    pub const fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// =============================================================================
// Period Zone
// =============================================================================

/// Time zone used to turn a timestamp into a [`Period`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodZone {
    /// The host's system time zone.
    #[default]
    Local,
    Utc,
}

impl fmt::Display for PeriodZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodZone::Local => write!(f, "local"),
            PeriodZone::Utc => write!(f, "utc"),
        }
    }
}

impl FromStr for PeriodZone {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "system" => Ok(PeriodZone::Local),
            "utc" => Ok(PeriodZone::Utc),
            other => Err(CoreError::Validation(
                crate::error::ValidationError::InvalidFormat {
                    field: "time_zone".to_string(),
                    reason: format!("unknown zone '{}', expected local or utc", other),
                },
            )),
        }
    }
}

// =============================================================================
// Sequence Scope
// =============================================================================

/// Key of one sequence counter: (store, year, month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceScope {
    /// Owning store, `None` for legacy invoices without one.
    pub store_id: Option<i64>,
    pub period: Period,
}

impl SequenceScope {
    pub fn new(store_id: Option<i64>, period: Period) -> Self {
        SequenceScope { store_id, period }
    }

    /// Store key as persisted in `sequence_counters.store_id`.
    #[inline]
    pub fn store_key(&self) -> i64 {
        self.store_id.unwrap_or(UNASSIGNED_STORE_KEY)
    }
}

impl fmt::Display for SequenceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.store_id {
            Some(id) => write!(f, "store {} / {}", id, self.period),
            None => write!(f, "no store / {}", self.period),
        }
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Source of wall-clock time.
///
/// Only the repair routine reads the clock; allocation always uses the
/// timestamp handed in by the caller.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a given instant (tests, replays).
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn test_period_bounds() {
        assert!(Period::new(2024, 1).is_ok());
        assert!(Period::new(2024, 12).is_ok());
        assert!(Period::new(2024, 0).is_err());
        assert!(Period::new(2024, 13).is_err());
        assert!(Period::new(10000, 1).is_err());
    }

    #[test]
    fn test_period_display() {
        assert_eq!(Period::new(2024, 3).unwrap().to_string(), "2024-03");
    }

    #[test]
    fn test_containing_ignores_source_offset() {
        // 2024-04-01 01:30 at +02:00 is still March in UTC.
        let paris = FixedOffset::east_opt(2 * 3600).unwrap();
        let at = paris
            .with_ymd_and_hms(2024, 4, 1, 1, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            Period::containing(at, PeriodZone::Utc),
            Period::new(2024, 3).unwrap()
        );
    }

    #[test]
    fn test_month_rollover() {
        let last = Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap();
        let first = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 1).unwrap();
        assert_eq!(Period::containing(last, PeriodZone::Utc).month(), 3);
        assert_eq!(Period::containing(first, PeriodZone::Utc).month(), 4);
    }

    #[test]
    fn test_zone_parsing() {
        assert_eq!("utc".parse::<PeriodZone>().unwrap(), PeriodZone::Utc);
        assert_eq!("Local".parse::<PeriodZone>().unwrap(), PeriodZone::Local);
        assert!("mars".parse::<PeriodZone>().is_err());
    }

    #[test]
    fn test_sentinel_scope_key() {
        let period = Period::new(2024, 1).unwrap();
        assert_eq!(SequenceScope::new(None, period).store_key(), 0);
        assert_eq!(SequenceScope::new(Some(42), period).store_key(), 42);
    }
}
