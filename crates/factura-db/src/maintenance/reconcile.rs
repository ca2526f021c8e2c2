//! # Sequence-Index Reconciliation
//!
//! Brings the uniqueness rules of `sequence_counters` to the target shape:
//! exactly one UNIQUE over `(store_id, year, month)`, nothing unique over
//! `store_id` alone.
//!
//! ## Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  unique_indexes("sequence_counters")                                    │
//! │       │                                                                 │
//! │       ├── columns == {store_id}?                                        │
//! │       │     ├── standalone index   → DROP INDEX                         │
//! │       │     └── table constraint   → rebuild table, rows copied         │
//! │       │                                                                 │
//! │       └── no index over {store_id, year, month}?                        │
//! │             └── CREATE UNIQUE INDEX idx_sequence_counters_scope         │
//! │                                                                         │
//! │  Correct schema → both steps skip → no DDL at all.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Introspection and DDL go through [`SchemaDialect`]; the decision logic
//! here never builds SQL.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

/// Counter table.
pub const COUNTER_TABLE: &str = "sequence_counters";

/// Name given to the composite index when reconciliation creates it.
pub const SCOPE_INDEX: &str = "idx_sequence_counters_scope";

/// Columns of the counter scope.
pub const SCOPE_COLUMNS: [&str; 3] = ["store_id", "year", "month"];

// =============================================================================
// Dialect Abstraction
// =============================================================================

/// Where a uniqueness rule was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrigin {
    /// `CREATE UNIQUE INDEX`; can be dropped on its own.
    Index,
    /// `UNIQUE` inside `CREATE TABLE`; bound to the table definition.
    Constraint,
}

/// A uniqueness rule on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIndex {
    pub name: String,
    /// Indexed columns in declaration order.
    pub columns: Vec<String>,
    pub origin: IndexOrigin,
}

impl UniqueIndex {
    /// True if the index covers exactly `columns`, in any order.
    pub fn covers_exactly(&self, columns: &[&str]) -> bool {
        let mine: BTreeSet<&str> = self.columns.iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = columns.iter().copied().collect();
        mine == theirs
    }
}

/// How a uniqueness rule was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Dropped,
    /// The table was rebuilt without the rule.
    Rebuilt,
}

/// Schema introspection and DDL needed by the reconciliation.
#[async_trait]
pub trait SchemaDialect: Send + Sync {
    /// Unique indexes and constraints on `table`, primary key excluded.
    async fn unique_indexes(&self, table: &str) -> DbResult<Vec<UniqueIndex>>;

    /// Removes one uniqueness rule. Every row of the table is kept.
    async fn drop_unique(&self, table: &str, index: &UniqueIndex) -> DbResult<DropOutcome>;

    /// Creates a unique index on `columns`.
    async fn create_unique_index(&self, table: &str, name: &str, columns: &[&str]) -> DbResult<()>;
}

// =============================================================================
// Reconciliation
// =============================================================================

/// What a reconciliation run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Standalone single-column indexes dropped.
    pub dropped: Vec<String>,
    /// Table-level single-column constraints removed by a rebuild.
    pub rebuilt: Vec<String>,
    /// Whether the composite index had to be created.
    pub created: bool,
}

impl ReconcileReport {
    /// True if the schema was already in shape.
    pub fn is_noop(&self) -> bool {
        self.dropped.is_empty() && self.rebuilt.is_empty() && !self.created
    }
}

/// Replaces a `UNIQUE(store_id)` on the counter table with the composite
/// `UNIQUE(store_id, year, month)`. Idempotent.
pub async fn reconcile_with(dialect: &dyn SchemaDialect) -> DbResult<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let indexes = dialect.unique_indexes(COUNTER_TABLE).await?;
    debug!(count = indexes.len(), "Unique indexes on counter table");

    for index in indexes.iter().filter(|i| i.covers_exactly(&["store_id"])) {
        match dialect.drop_unique(COUNTER_TABLE, index).await? {
            DropOutcome::Dropped => {
                info!(index = %index.name, "Dropped single-column unique index on store_id");
                report.dropped.push(index.name.clone());
            }
            DropOutcome::Rebuilt => {
                info!(index = %index.name, "Rebuilt counter table without UNIQUE(store_id)");
                report.rebuilt.push(index.name.clone());
            }
        }
    }

    // A rebuild may have renamed or removed the other rules; look again.
    let indexes = if report.rebuilt.is_empty() {
        indexes
    } else {
        dialect.unique_indexes(COUNTER_TABLE).await?
    };

    if !indexes.iter().any(|i| i.covers_exactly(&SCOPE_COLUMNS)) {
        dialect
            .create_unique_index(COUNTER_TABLE, SCOPE_INDEX, &SCOPE_COLUMNS)
            .await?;
        info!(index = SCOPE_INDEX, "Created composite unique index on counter scope");
        report.created = true;
    }

    if report.is_noop() {
        debug!("Counter table already reconciled");
    }
    Ok(report)
}

// =============================================================================
// SQLite Dialect
// =============================================================================

/// [`SchemaDialect`] over `pragma_index_list` / `pragma_index_info`.
#[derive(Debug, Clone)]
pub struct SqliteDialect {
    pool: SqlitePool,
}

/// Row of `pragma_table_info`: (cid, name, type, notnull, dflt_value, pk).
type ColumnInfo = (i64, String, String, i64, Option<String>, i64);

impl SqliteDialect {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteDialect { pool }
    }

    async fn index_columns(&self, index: &str) -> DbResult<Vec<String>> {
        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
                .bind(index)
                .fetch_all(&self.pool)
                .await?;
        Ok(columns)
    }

    /// Recreates `table` from its column metadata, carrying columns, types,
    /// NOT NULL, defaults, the primary key, CHECK constraints and every index
    /// except `skip`. Other table-level UNIQUE constraints come back as
    /// unique indexes; CHECKs come back as table-level constraints.
    async fn rebuild_without(&self, table: &str, skip: &UniqueIndex) -> DbResult<()> {
        let columns: Vec<ColumnInfo> = sqlx::query_as("SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        if columns.is_empty() {
            return Err(DbError::not_found("Table", table));
        }

        let table_sql: String = sqlx::query_scalar(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        let autoincrement = table_sql.to_uppercase().contains("AUTOINCREMENT");
        let checks = check_clauses(&table_sql);

        // Standalone indexes keep their original statement.
        let index_sql: Vec<String> = sqlx::query_scalar(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL AND name <> ?2",
        )
        .bind(table)
        .bind(&skip.name)
        .fetch_all(&self.pool)
        .await?;

        let kept_constraints: Vec<UniqueIndex> = self
            .unique_indexes(table)
            .await?
            .into_iter()
            .filter(|i| i.origin == IndexOrigin::Constraint && i.name != skip.name)
            .collect();

        let rebuild = format!("{}__rebuild", table);
        let create = create_table_sql(&rebuild, &columns, &checks, autoincrement);
        let column_list = columns
            .iter()
            .map(|c| quote_ident(&c.1))
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = self.pool.begin().await?;

        sqlx::query(&create).execute(&mut *tx).await?;
        sqlx::query(&format!(
            "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
            quote_ident(&rebuild),
            quote_ident(table),
            cols = column_list
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DROP TABLE {}", quote_ident(table)))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&rebuild),
            quote_ident(table)
        ))
        .execute(&mut *tx)
        .await?;

        for sql in &index_sql {
            sqlx::query(sql).execute(&mut *tx).await?;
        }
        for constraint in &kept_constraints {
            let name = format!("{}_{}_key", table, constraint.columns.join("_"));
            sqlx::query(&create_index_sql(table, &name, &constraint.columns))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl SchemaDialect for SqliteDialect {
    async fn unique_indexes(&self, table: &str) -> DbResult<Vec<UniqueIndex>> {
        let listed: Vec<(String, i64, String)> =
            sqlx::query_as("SELECT name, \"unique\", origin FROM pragma_index_list(?1)")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;

        let mut indexes = Vec::new();
        for (name, unique, origin) in listed {
            let origin = match (unique, origin.as_str()) {
                (1, "c") => IndexOrigin::Index,
                (1, "u") => IndexOrigin::Constraint,
                _ => continue,
            };
            let columns = self.index_columns(&name).await?;
            indexes.push(UniqueIndex {
                name,
                columns,
                origin,
            });
        }

        Ok(indexes)
    }

    async fn drop_unique(&self, table: &str, index: &UniqueIndex) -> DbResult<DropOutcome> {
        match index.origin {
            IndexOrigin::Index => {
                sqlx::query(&format!("DROP INDEX IF EXISTS {}", quote_ident(&index.name)))
                    .execute(&self.pool)
                    .await?;
                Ok(DropOutcome::Dropped)
            }
            IndexOrigin::Constraint => {
                self.rebuild_without(table, index).await?;
                Ok(DropOutcome::Rebuilt)
            }
        }
    }

    async fn create_unique_index(&self, table: &str, name: &str, columns: &[&str]) -> DbResult<()> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        sqlx::query(&create_index_sql(table, name, &columns))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Double-quotes an SQLite identifier.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn create_index_sql(table: &str, name: &str, columns: &[String]) -> String {
    let columns = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(name),
        quote_ident(table),
        columns
    )
}

fn create_table_sql(
    table: &str,
    columns: &[ColumnInfo],
    checks: &[String],
    autoincrement: bool,
) -> String {
    let pk_columns: Vec<&str> = {
        let mut pk: Vec<&ColumnInfo> = columns.iter().filter(|c| c.5 > 0).collect();
        pk.sort_by_key(|c| c.5);
        pk.into_iter().map(|c| c.1.as_str()).collect()
    };
    let single_integer_pk = pk_columns.len() == 1;

    let mut defs: Vec<String> = columns
        .iter()
        .map(|(_, name, ty, notnull, default, pk)| {
            let mut def = format!("{} {}", quote_ident(name), ty);
            if single_integer_pk && *pk == 1 {
                def.push_str(" PRIMARY KEY");
                if autoincrement {
                    def.push_str(" AUTOINCREMENT");
                }
            }
            if *notnull == 1 {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = default {
                def.push_str(&format!(" DEFAULT ({})", default));
            }
            def
        })
        .collect();

    if pk_columns.len() > 1 {
        defs.push(format!(
            "PRIMARY KEY ({})",
            pk_columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    defs.extend(checks.iter().cloned());

    format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
}

/// Every `CHECK (...)` clause of a `CREATE TABLE` statement, column-level
/// or table-level, as a table-level constraint. Constraint names are dropped.
fn check_clauses(table_sql: &str) -> Vec<String> {
    let bytes = table_sql.as_bytes();
    let mut clauses = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            q @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, q);
                continue;
            }
            b'[' => {
                i = skip_quoted(bytes, i, b']');
                continue;
            }
            _ => {}
        }

        let is_word_start = i == 0 || !is_ident_byte(bytes[i - 1]);
        let end = i + "CHECK".len();
        if is_word_start
            && end <= bytes.len()
            && bytes[i..end].eq_ignore_ascii_case(b"CHECK")
            && bytes.get(end).map_or(true, |b| !is_ident_byte(*b))
        {
            let mut open = end;
            while open < bytes.len() && bytes[open].is_ascii_whitespace() {
                open += 1;
            }
            if bytes.get(open) == Some(&b'(') {
                if let Some(close) = closing_paren(bytes, open) {
                    clauses.push(format!("CHECK {}", &table_sql[open..=close]));
                    i = close + 1;
                    continue;
                }
            }
        }
        i += 1;
    }

    clauses
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Index just past the quoted run opened at `start`; a doubled closing
/// quote is an escape.
fn skip_quoted(bytes: &[u8], start: usize, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Index of the parenthesis closing the one at `open`.
fn closing_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            q @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, q);
                continue;
            }
            b'[' => {
                i = skip_quoted(bytes, i, b']');
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use factura_core::{Period, SequenceScope};
    use std::sync::Mutex;

    fn scope(store_id: i64, month: u32) -> SequenceScope {
        SequenceScope::new(Some(store_id), Period::new(2024, month).unwrap())
    }

    async fn unique_shapes(db: &Database) -> Vec<Vec<String>> {
        SqliteDialect::new(db.pool().clone())
            .unique_indexes(COUNTER_TABLE)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.columns)
            .collect()
    }

    fn composite() -> Vec<String> {
        SCOPE_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn test_correct_schema_is_noop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let dialect = SqliteDialect::new(db.pool().clone());

        let report = reconcile_with(&dialect).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(unique_shapes(&db).await, vec![composite()]);
    }

    #[tokio::test]
    async fn test_replaces_legacy_unique_index() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        for sql in [
            "DROP INDEX idx_sequence_counters_scope",
            "CREATE UNIQUE INDEX legacy_counter_store ON sequence_counters(store_id)",
            "INSERT INTO sequence_counters (store_id, year, month, last_value, updated_at) VALUES (1, 2024, 3, 5, '2024-03-20T00:00:00Z')",
        ] {
            sqlx::query(sql).execute(db.pool()).await.unwrap();
        }
        let dialect = SqliteDialect::new(db.pool().clone());

        let report = reconcile_with(&dialect).await.unwrap();
        assert_eq!(report.dropped, vec!["legacy_counter_store".to_string()]);
        assert!(report.rebuilt.is_empty());
        assert!(report.created);
        assert_eq!(unique_shapes(&db).await, vec![composite()]);

        let seq = db.sequences();
        assert_eq!(seq.peek(scope(1, 3)).await.unwrap(), 5);
        assert_eq!(seq.next(scope(1, 4)).await.unwrap(), 1);
        assert_eq!(seq.next(scope(1, 3)).await.unwrap(), 6);

        assert!(reconcile_with(&dialect).await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_rebuilds_table_with_legacy_constraint() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        for sql in [
            "DROP TABLE sequence_counters",
            r#"CREATE TABLE sequence_counters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                store_id INTEGER NOT NULL DEFAULT 0 UNIQUE,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
                last_value INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                CONSTRAINT non_negative CHECK (last_value >= 0)
            )"#,
            "INSERT INTO sequence_counters (store_id, year, month, last_value, updated_at) VALUES (1, 2024, 3, 5, '2024-03-20T00:00:00Z')",
            "INSERT INTO sequence_counters (store_id, year, month, last_value, updated_at) VALUES (2, 2024, 3, 9, '2024-03-20T00:00:00Z')",
        ] {
            sqlx::query(sql).execute(db.pool()).await.unwrap();
        }
        let dialect = SqliteDialect::new(db.pool().clone());

        let report = reconcile_with(&dialect).await.unwrap();
        assert!(report.dropped.is_empty());
        assert_eq!(report.rebuilt.len(), 1);
        assert!(report.created);
        assert_eq!(unique_shapes(&db).await, vec![composite()]);

        let seq = db.sequences();
        assert_eq!(seq.peek(scope(1, 3)).await.unwrap(), 5);
        assert_eq!(seq.peek(scope(2, 3)).await.unwrap(), 9);
        assert_eq!(seq.next(scope(1, 4)).await.unwrap(), 1);

        for bad in [
            "INSERT INTO sequence_counters (store_id, year, month, last_value, updated_at) VALUES (3, 2024, 13, 0, '2024-03-20T00:00:00Z')",
            "INSERT INTO sequence_counters (store_id, year, month, last_value, updated_at) VALUES (3, 2024, 5, -1, '2024-03-20T00:00:00Z')",
        ] {
            let result = sqlx::query(bad).execute(db.pool()).await;
            assert!(result.is_err(), "CHECK constraint lost in rebuild: {}", bad);
        }

        let second = reconcile_with(&dialect).await.unwrap();
        assert!(second.is_noop());
    }

    #[tokio::test]
    async fn test_creates_missing_composite_index() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("DROP INDEX idx_sequence_counters_scope")
            .execute(db.pool())
            .await
            .unwrap();
        let dialect = SqliteDialect::new(db.pool().clone());

        let report = reconcile_with(&dialect).await.unwrap();
        assert!(report.dropped.is_empty());
        assert!(report.created);
        assert_eq!(db.sequences().next(scope(1, 3)).await.unwrap(), 1);
    }

    /// In-memory dialect recording the DDL it was asked for.
    #[derive(Default)]
    struct RecordingDialect {
        indexes: Mutex<Vec<UniqueIndex>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SchemaDialect for RecordingDialect {
        async fn unique_indexes(&self, _table: &str) -> DbResult<Vec<UniqueIndex>> {
            Ok(self.indexes.lock().unwrap().clone())
        }

        async fn drop_unique(&self, _table: &str, index: &UniqueIndex) -> DbResult<DropOutcome> {
            self.calls.lock().unwrap().push(format!("drop {}", index.name));
            self.indexes.lock().unwrap().retain(|i| i.name != index.name);
            Ok(DropOutcome::Dropped)
        }

        async fn create_unique_index(&self, _table: &str, name: &str, columns: &[&str]) -> DbResult<()> {
            self.calls.lock().unwrap().push(format!("create {}", name));
            self.indexes.lock().unwrap().push(UniqueIndex {
                name: name.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                origin: IndexOrigin::Index,
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reconcile_leaves_unrelated_indexes_alone() {
        let dialect = RecordingDialect::default();
        dialect.indexes.lock().unwrap().extend([
            UniqueIndex {
                name: "scope_reordered".into(),
                columns: vec!["month".into(), "year".into(), "store_id".into()],
                origin: IndexOrigin::Index,
            },
            UniqueIndex {
                name: "store_and_year".into(),
                columns: vec!["store_id".into(), "year".into()],
                origin: IndexOrigin::Index,
            },
        ]);

        let report = reconcile_with(&dialect).await.unwrap();
        assert!(report.is_noop());
        assert!(dialect.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_order_of_operations() {
        let dialect = RecordingDialect::default();
        dialect.indexes.lock().unwrap().push(UniqueIndex {
            name: "legacy".into(),
            columns: vec!["store_id".into()],
            origin: IndexOrigin::Index,
        });

        reconcile_with(&dialect).await.unwrap();
        assert_eq!(
            *dialect.calls.lock().unwrap(),
            vec!["drop legacy".to_string(), format!("create {}", SCOPE_INDEX)]
        );
    }

    #[test]
    fn test_check_clauses() {
        let sql = r#"CREATE TABLE t (
            id INTEGER PRIMARY KEY,
            month INTEGER CHECK(month BETWEEN 1 AND 12),
            note TEXT DEFAULT 'check (no)',
            "checked" INTEGER,
            CONSTRAINT c1 check ((length(note) > 0) OR note IS NULL)
        )"#;

        assert_eq!(
            check_clauses(sql),
            vec![
                "CHECK (month BETWEEN 1 AND 12)".to_string(),
                "CHECK ((length(note) > 0) OR note IS NULL)".to_string(),
            ]
        );
        assert!(check_clauses("CREATE TABLE t (id INTEGER)").is_empty());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("store_id"), "\"store_id\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
