//! # Sequence Store
//!
//! Durable per-(store, year, month) counters. This module is the only code
//! that writes `sequence_counters`.
//!
//! ## Allocation Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      next(store 3, 2024-03)                             │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    UPDATE ... SET last_value = last_value + 1 ... RETURNING last_value  │
//! │       │   (first write: takes the database write lock)                  │
//! │       │                                                                 │
//! │       ├── row returned ───────────────────────────────┐                 │
//! │       │                                               │                 │
//! │       └── no row: INSERT (last_value 0)               │                 │
//! │             ON CONFLICT (store_id, year, month)       │                 │
//! │             DO NOTHING, then UPDATE again             │                 │
//! │                                                       ▼                 │
//! │    value > 9999 ? ROLLBACK, SequenceExhausted : COMMIT                  │
//! │                                                                         │
//! │  SQLITE_BUSY anywhere ──► rollback, back off, retry (max_attempts)      │
//! │  retry budget spent   ──► SequenceUnavailable, nothing persisted        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The composite UNIQUE index on `(store_id, year, month)` is what the
//! `ON CONFLICT` target resolves against. Without it SQLite refuses the
//! statement, which surfaces as [`DbError::SchemaViolation`].

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{DbError, DbResult};
use factura_core::{SequenceCounter, SequenceScope, MAX_SEQUENCE};

const ADVANCE_SQL: &str = r#"
    UPDATE sequence_counters
    SET last_value = last_value + 1, updated_at = ?4
    WHERE store_id = ?1 AND year = ?2 AND month = ?3
    RETURNING last_value
"#;

/// Durable, concurrency-safe counter keyed by [`SequenceScope`].
#[derive(Debug, Clone)]
pub struct SequenceStore {
    pool: SqlitePool,
    policy: RetryPolicy,
}

impl SequenceStore {
    pub fn new(pool: SqlitePool, policy: RetryPolicy) -> Self {
        SequenceStore { pool, policy }
    }

    /// Acquires the next value of `scope` and persists it.
    ///
    /// Two concurrent calls on the same scope always return two distinct
    /// consecutive integers. Contention is retried with exponential backoff;
    /// once the budget is spent the call fails with
    /// [`DbError::SequenceUnavailable`] and no advance is persisted.
    pub async fn next(&self, scope: SequenceScope) -> DbResult<i64> {
        let mut backoff = self.create_backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.try_next(&scope).await {
                Ok(value) => {
                    debug!(%scope, value, attempt, "Sequence advanced");
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let wait = backoff.next_backoff().unwrap_or(self.policy.max_backoff);
                    warn!(%scope, attempt, ?wait, error = %e, "Sequence contended, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) if e.is_retryable() => {
                    warn!(%scope, attempts = attempt, error = %e, "Sequence retry budget exhausted");
                    return Err(DbError::SequenceUnavailable {
                        scope: scope.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One allocation transaction. Dropping `tx` on any error rolls back.
    async fn try_next(&self, scope: &SequenceScope) -> DbResult<i64> {
        let store_key = scope.store_key();
        let year = scope.period.year();
        let month = scope.period.month();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let advanced: Option<i64> = sqlx::query_scalar(ADVANCE_SQL)
            .bind(store_key)
            .bind(year)
            .bind(month)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

        let value = match advanced {
            Some(value) => value,
            None => {
                debug!(%scope, "Creating counter row");

                sqlx::query(
                    r#"
                    INSERT INTO sequence_counters (store_id, year, month, last_value, updated_at)
                    VALUES (?1, ?2, ?3, 0, ?4)
                    ON CONFLICT (store_id, year, month) DO NOTHING
                    "#,
                )
                .bind(store_key)
                .bind(year)
                .bind(month)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| foreign_uniqueness(scope, e.into()))?;

                // Either our zero row or one a racing writer committed first.
                let reread: Option<i64> = sqlx::query_scalar(ADVANCE_SQL)
                    .bind(store_key)
                    .bind(year)
                    .bind(month)
                    .bind(now)
                    .fetch_optional(&mut *tx)
                    .await?;

                reread.ok_or_else(|| {
                    DbError::SchemaViolation(format!(
                        "counter row for {} vanished after insert",
                        scope
                    ))
                })?
            }
        };

        if value > MAX_SEQUENCE {
            tx.rollback().await?;
            warn!(%scope, max = MAX_SEQUENCE, "Sequence exhausted");
            return Err(DbError::SequenceExhausted {
                scope: scope.to_string(),
            });
        }

        tx.commit()
            .await
            .map_err(|e| match DbError::from(e) {
                err if err.is_retryable() => err,
                err => DbError::TransactionFailed(err.to_string()),
            })?;

        Ok(value)
    }

    /// Current last-assigned value of `scope`, `0` if no row exists.
    /// Read-only; reserves nothing.
    pub async fn peek(&self, scope: SequenceScope) -> DbResult<i64> {
        let value: Option<i64> = sqlx::query_scalar(
            "SELECT last_value FROM sequence_counters WHERE store_id = ?1 AND year = ?2 AND month = ?3",
        )
        .bind(scope.store_key())
        .bind(scope.period.year())
        .bind(scope.period.month())
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.unwrap_or(0))
    }

    /// Full counter row of `scope`, if one exists.
    pub async fn get(&self, scope: SequenceScope) -> DbResult<Option<SequenceCounter>> {
        let row = sqlx::query_as::<_, SequenceCounter>(
            r#"
            SELECT id, store_id, year, month, last_value, updated_at
            FROM sequence_counters
            WHERE store_id = ?1 AND year = ?2 AND month = ?3
            "#,
        )
        .bind(scope.store_key())
        .bind(scope.period.year())
        .bind(scope.period.month())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Raises the counter of `scope` to at least `value`. Never lowers it.
    ///
    /// Returns `true` when the stored value changed.
    pub async fn raise_floor(&self, scope: SequenceScope, value: i64) -> DbResult<bool> {
        if !(0..=MAX_SEQUENCE).contains(&value) {
            return Err(DbError::InvalidInput(format!(
                "counter floor {} outside 0..={}",
                value, MAX_SEQUENCE
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO sequence_counters (store_id, year, month, last_value, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (store_id, year, month) DO UPDATE
            SET last_value = excluded.last_value, updated_at = excluded.updated_at
            WHERE excluded.last_value > sequence_counters.last_value
            "#,
        )
        .bind(scope.store_key())
        .bind(scope.period.year())
        .bind(scope.period.month())
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| foreign_uniqueness(&scope, e.into()))?;

        let raised = result.rows_affected() > 0;
        if raised {
            debug!(%scope, value, "Counter floor raised");
        }
        Ok(raised)
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.policy.initial_backoff,
            max_interval: self.policy.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // Bounded by max_attempts instead
            ..Default::default()
        }
    }
}

/// A UNIQUE failure on a counter insert that the composite ON CONFLICT target
/// did not absorb comes from some other unique index, i.e. the legacy
/// `UNIQUE(store_id)`.
fn foreign_uniqueness(scope: &SequenceScope, err: DbError) -> DbError {
    match err {
        DbError::UniqueViolation { field, .. } => DbError::SchemaViolation(format!(
            "unexpected unique constraint on {} while creating counter for {}; run reconcile_sequence_index",
            field, scope
        )),
        other => other,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorSettings;
    use crate::{Database, DbConfig};
    use factura_core::Period;
    use std::collections::HashSet;
    use std::time::Duration;

    fn scope(store_id: Option<i64>, year: i32, month: u32) -> SequenceScope {
        SequenceScope::new(store_id, Period::new(year, month).unwrap())
    }

    #[tokio::test]
    async fn test_next_is_consecutive_and_peek_matches() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seq = db.sequences();
        let s = scope(Some(1), 2024, 3);

        assert_eq!(seq.peek(s).await.unwrap(), 0);
        assert_eq!(seq.next(s).await.unwrap(), 1);
        assert_eq!(seq.next(s).await.unwrap(), 2);

        let k = seq.next(s).await.unwrap();
        assert_eq!(k, 3);
        assert_eq!(seq.peek(s).await.unwrap(), k);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seq = db.sequences();

        assert_eq!(seq.next(scope(Some(1), 2024, 3)).await.unwrap(), 1);
        assert_eq!(seq.next(scope(Some(1), 2024, 3)).await.unwrap(), 2);
        assert_eq!(seq.next(scope(Some(1), 2024, 4)).await.unwrap(), 1);
        assert_eq!(seq.next(scope(Some(2), 2024, 3)).await.unwrap(), 1);
        assert_eq!(seq.next(scope(None, 2024, 3)).await.unwrap(), 1);
        assert_eq!(seq.next(scope(None, 2024, 3)).await.unwrap(), 2);

        let row = seq.get(scope(None, 2024, 3)).await.unwrap().unwrap();
        assert_eq!(row.store_id, 0);
        assert_eq!(row.last_value, 2);
        assert_eq!(row.scope(), Some(scope(None, 2024, 3)));
    }

    #[tokio::test]
    async fn test_overflow_is_rejected_without_advance() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seq = db.sequences();
        let s = scope(Some(7), 2024, 5);

        assert!(seq.raise_floor(s, 9998).await.unwrap());
        assert_eq!(seq.next(s).await.unwrap(), 9999);

        let result = seq.next(s).await;
        assert!(matches!(result, Err(DbError::SequenceExhausted { .. })));
        assert_eq!(seq.peek(s).await.unwrap(), 9999);
    }

    #[tokio::test]
    async fn test_raise_floor_never_lowers() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seq = db.sequences();
        let s = scope(Some(1), 2024, 6);

        assert!(seq.raise_floor(s, 5).await.unwrap());
        assert!(!seq.raise_floor(s, 3).await.unwrap());
        assert!(!seq.raise_floor(s, 5).await.unwrap());
        assert_eq!(seq.peek(s).await.unwrap(), 5);
        assert_eq!(seq.next(s).await.unwrap(), 6);

        assert!(seq.raise_floor(s, 10_000).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_composite_index_is_schema_violation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("DROP INDEX idx_sequence_counters_scope")
            .execute(db.pool())
            .await
            .unwrap();

        let result = db.sequences().next(scope(Some(1), 2024, 3)).await;
        assert!(matches!(result, Err(DbError::SchemaViolation(_))));
    }

    #[tokio::test]
    async fn test_legacy_store_unique_is_schema_violation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("CREATE UNIQUE INDEX legacy_store_unique ON sequence_counters(store_id)")
            .execute(db.pool())
            .await
            .unwrap();

        let seq = db.sequences();
        assert_eq!(seq.next(scope(Some(1), 2024, 3)).await.unwrap(), 1);

        let result = seq.next(scope(Some(1), 2024, 4)).await;
        assert!(matches!(result, Err(DbError::SchemaViolation(_))));
        assert_eq!(seq.peek(scope(Some(1), 2024, 4)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_next_yields_distinct_consecutive_values() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("seq.db")).max_connections(4))
            .await
            .unwrap();
        let s = scope(Some(1), 2024, 3);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = db.sequences();
                tokio::spawn(async move { seq.next(s).await })
            })
            .collect();

        let mut values = HashSet::new();
        for handle in handles {
            values.insert(handle.await.unwrap().unwrap());
        }

        assert_eq!(values, (1..=8).collect::<HashSet<i64>>());
        assert_eq!(db.sequences().peek(s).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_contention_exhausts_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AllocatorSettings {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..AllocatorSettings::default()
        };
        let db = Database::new(
            DbConfig::new(dir.path().join("busy.db"))
                .max_connections(2)
                .busy_timeout(Duration::ZERO)
                .allocator(settings),
        )
        .await
        .unwrap();
        let s = scope(Some(1), 2024, 3);

        // Hold the write lock from another connection.
        let mut blocker = db.pool().begin().await.unwrap();
        sqlx::query("INSERT INTO stores (name, created_at) VALUES ('Blocker', '2024-03-01T00:00:00Z')")
            .execute(&mut *blocker)
            .await
            .unwrap();

        let result = db.sequences().next(s).await;
        assert!(matches!(
            result,
            Err(DbError::SequenceUnavailable { attempts: 2, .. })
        ));

        blocker.rollback().await.unwrap();

        assert_eq!(db.sequences().peek(s).await.unwrap(), 0);
        assert_eq!(db.sequences().next(s).await.unwrap(), 1);
    }
}
