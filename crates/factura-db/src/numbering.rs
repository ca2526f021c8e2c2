//! # Number Allocator
//!
//! Composes `YYYY-MM-TAG-NNNN` from a store, a timestamp and one counter
//! advance.
//!
//! ## Allocation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  allocate(Some(store 3 "Boutique Centre-Ville"), 2024-03-15T10:00Z)     │
//! │       │                                                                 │
//! │       ├── Period::containing(at, zone)    → 2024-03                     │
//! │       ├── StoreTag::for_store(store)      → BOUTIQ                      │
//! │       ├── SequenceStore::next(3, 2024-03) → 7                           │
//! │       ▼                                                                 │
//! │  "2024-03-BOUTIQ-0007"                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The period comes from the caller's timestamp, never from the wall clock.
//! Each successful call advances exactly one counter. A number handed out
//! and then not persisted is simply a gap.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::sequence::SequenceStore;
use factura_core::{InvoiceNumber, Period, PeriodZone, SequenceScope, Store, StoreTag};

/// Allocates invoice numbers. Holds no state besides its configuration.
#[derive(Debug, Clone)]
pub struct NumberAllocator {
    sequences: SequenceStore,
    zone: PeriodZone,
}

impl NumberAllocator {
    pub fn new(sequences: SequenceStore, zone: PeriodZone) -> Self {
        NumberAllocator { sequences, zone }
    }

    /// Zone used to derive the period of a timestamp.
    pub fn zone(&self) -> PeriodZone {
        self.zone
    }

    /// Allocates the next number for `store` in the month containing `at`.
    ///
    /// ## Errors
    /// - [`DbError::SequenceUnavailable`](crate::DbError::SequenceUnavailable) after contention retries
    /// - [`DbError::SequenceExhausted`](crate::DbError::SequenceExhausted) past 9999 in one month
    /// - [`DbError::SchemaViolation`](crate::DbError::SchemaViolation) if the counter table is misshapen
    pub async fn allocate(&self, store: Option<&Store>, at: DateTime<Utc>) -> DbResult<InvoiceNumber> {
        let period = Period::containing(at, self.zone);
        let tag = StoreTag::for_store(store);
        let scope = SequenceScope::new(store.map(|s| s.id), period);

        let sequence = self.sequences.next(scope).await?;
        let number = InvoiceNumber::new(period, tag, sequence)?;

        debug!(%scope, %number, "Invoice number allocated");
        Ok(number)
    }

    /// Last value handed out for a store and month, `0` if none yet.
    pub async fn peek_sequence(&self, store_id: Option<i64>, year: i32, month: u32) -> DbResult<i64> {
        let period = Period::new(year, month)?;
        self.sequences
            .peek(SequenceScope::new(store_id, period))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorSettings;
    use crate::{Database, DbConfig, DbError};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn utc_config(config: DbConfig) -> DbConfig {
        config.allocator(AllocatorSettings {
            time_zone: PeriodZone::Utc,
            ..AllocatorSettings::default()
        })
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_allocations() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(utc_config(
            DbConfig::new(dir.path().join("alloc.db")).max_connections(4),
        ))
        .await
        .unwrap();
        let store = db.stores().insert("StoreA").await.unwrap();
        let when = at(2024, 3, 15, 10, 0, 0);

        let a = {
            let allocator = db.allocator();
            let store = store.clone();
            tokio::spawn(async move { allocator.allocate(Some(&store), when).await })
        };
        let b = {
            let allocator = db.allocator();
            let store = store.clone();
            tokio::spawn(async move { allocator.allocate(Some(&store), when).await })
        };

        let numbers: HashSet<String> = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()]
            .iter()
            .map(ToString::to_string)
            .collect();

        let expected: HashSet<String> = ["2024-03-STOREA-0001", "2024-03-STOREA-0002"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(numbers, expected);
        assert_eq!(
            db.allocator().peek_sequence(Some(store.id), 2024, 3).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_store_name_becomes_tag() {
        let db = Database::new(utc_config(DbConfig::in_memory())).await.unwrap();
        let store = db.stores().insert("Boutique Centre-Ville").await.unwrap();

        let number = db
            .allocator()
            .allocate(Some(&store), at(2024, 3, 15, 9, 30, 0))
            .await
            .unwrap();

        assert_eq!(number.tag().as_str(), "BOUTIQ");
        assert_eq!(number.to_string(), "2024-03-BOUTIQ-0001");
    }

    #[tokio::test]
    async fn test_null_store_uses_sentinel() {
        let db = Database::new(utc_config(DbConfig::in_memory())).await.unwrap();

        let number = db
            .allocator()
            .allocate(None, at(2024, 1, 1, 12, 0, 0))
            .await
            .unwrap();

        assert!(number.to_string().starts_with("2024-01-BTQ001-"));
        assert_eq!(db.allocator().peek_sequence(None, 2024, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_month_rollover_restarts_counter() {
        let db = Database::new(utc_config(DbConfig::in_memory())).await.unwrap();
        let store = db.stores().insert("Alpha").await.unwrap();
        let allocator = db.allocator();

        let mut last = None;
        for _ in 0..7 {
            last = Some(
                allocator
                    .allocate(Some(&store), at(2024, 3, 31, 23, 59, 59))
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(last.unwrap().to_string(), "2024-03-ALPHA-0007");

        let april = allocator
            .allocate(Some(&store), at(2024, 4, 1, 0, 0, 1))
            .await
            .unwrap();
        assert_eq!(april.to_string(), "2024-04-ALPHA-0001");
    }

    #[tokio::test]
    async fn test_stores_sharing_a_tag_count_separately() {
        let db = Database::new(utc_config(DbConfig::in_memory())).await.unwrap();
        let first = db.stores().insert("Boutique Nord").await.unwrap();
        let second = db.stores().insert("Boutique Sud").await.unwrap();
        let when = at(2024, 5, 2, 8, 0, 0);

        let a = db.allocator().allocate(Some(&first), when).await.unwrap();
        let b = db.allocator().allocate(Some(&second), when).await.unwrap();

        assert_eq!(a.tag(), b.tag());
        assert_eq!(a.sequence(), 1);
        assert_eq!(b.sequence(), 1);
    }

    #[tokio::test]
    async fn test_local_zone_mid_month() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert_eq!(db.allocator().zone(), PeriodZone::Local);

        let number = db
            .allocator()
            .allocate(None, at(2024, 3, 15, 12, 0, 0))
            .await
            .unwrap();
        assert_eq!(number.period(), Period::new(2024, 3).unwrap());
    }

    #[tokio::test]
    async fn test_peek_rejects_bad_month() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let result = db.allocator().peek_sequence(Some(1), 2024, 13).await;
        assert!(matches!(result, Err(DbError::InvalidInput(_))));
    }
}
