//! # Invoice Repository
//!
//! Invoice rows, and the invoice-creation hook that numbers them.
//!
//! ## Create Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_invoice(store_id, created_at, payload)                          │
//! │       │                                                                 │
//! │       ├── resolve store (name → tag)                                    │
//! │       ▼                                                                 │
//! │  ┌──► allocate(store, created_at) ── "2024-03-BOUTIQ-0001"              │
//! │  │        │                                                             │
//! │  │        ▼                                                             │
//! │  │   INSERT ... WHERE NOT EXISTS (same number)                          │
//! │  │        │                                                             │
//! │  │        ├── inserted ──────────────► Invoice                          │
//! │  │        │                                                             │
//! │  └────────┴── taken (another store shares the tag):                     │
//! │               warn, advance again, up to collision_retries              │
//! │               then TagCollision                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `number` is a snapshot: renaming the store later does not touch it.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::numbering::NumberAllocator;
use factura_core::{Invoice, InvoiceNumber, Period, Store};

/// Name of the UNIQUE index on `invoices(number)`.
pub const NUMBER_INDEX: &str = "idx_invoices_number";

/// One row of the keyset scan used by maintenance.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceScanRow {
    pub id: i64,
    pub store_id: Option<i64>,
    /// Current name of the owning store, `None` without a store.
    pub store_name: Option<String>,
    pub number: String,
    pub created_at: DateTime<Utc>,
}

/// Repository for invoice database operations.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
    allocator: NumberAllocator,
    collision_retries: u32,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool, allocator: NumberAllocator, collision_retries: u32) -> Self {
        InvoiceRepository {
            pool,
            allocator,
            collision_retries,
        }
    }

    /// Creates an invoice and assigns its number.
    ///
    /// Any error means the invoice was not created; a counter value may
    /// have been consumed (a gap), never reused.
    pub async fn create_invoice(
        &self,
        store_id: Option<i64>,
        created_at: DateTime<Utc>,
        payload: Option<&serde_json::Value>,
    ) -> DbResult<Invoice> {
        let store = match store_id {
            Some(id) => Some(self.load_store(id).await?),
            None => None,
        };
        let payload = payload.map(|value| value.to_string());

        let mut last_number = String::new();
        for attempt in 0..=self.collision_retries {
            let number = self.allocator.allocate(store.as_ref(), created_at).await?;
            last_number = number.to_string();

            match self
                .insert_guarded(store_id, &last_number, created_at, payload.as_deref())
                .await
            {
                Ok(Some(invoice)) => {
                    info!(id = invoice.id, number = %invoice.number, "Invoice created");
                    return Ok(invoice);
                }
                Ok(None) | Err(DbError::UniqueViolation { .. }) => {
                    warn!(
                        number = %last_number,
                        store_id = ?store_id,
                        attempt,
                        "Invoice number already taken by a store sharing this tag"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(DbError::TagCollision {
            number: last_number,
        })
    }

    async fn load_store(&self, id: i64) -> DbResult<Store> {
        sqlx::query_as::<_, Store>("SELECT id, name, created_at FROM stores WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Store", id.to_string()))
    }

    /// Inserts unless some invoice already carries `number`.
    async fn insert_guarded(
        &self,
        store_id: Option<i64>,
        number: &str,
        created_at: DateTime<Utc>,
        payload: Option<&str>,
    ) -> DbResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (store_id, number, created_at, payload)
            SELECT ?1, ?2, ?3, ?4
            WHERE NOT EXISTS (SELECT 1 FROM invoices WHERE number = ?2)
            RETURNING id, store_id, number, created_at, payload
            "#,
        )
        .bind(store_id)
        .bind(number)
        .bind(created_at)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }

    /// Gets an invoice by its ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(
            "SELECT id, store_id, number, created_at, payload FROM invoices WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }

    /// Up to `limit` invoices with `id > after_id`, ascending by id.
    pub async fn page_after(&self, after_id: i64, limit: u32) -> DbResult<Vec<InvoiceScanRow>> {
        let rows = sqlx::query_as::<_, InvoiceScanRow>(
            r#"
            SELECT i.id, i.store_id, s.name AS store_name, i.number, i.created_at
            FROM invoices i
            LEFT JOIN stores s ON s.id = i.store_id
            WHERE i.id > ?1
            ORDER BY i.id
            LIMIT ?2
            "#,
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Total number of invoices.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// True if an invoice with an id lower than `id` carries `number`.
    pub async fn number_held_before(&self, number: &str, id: i64) -> DbResult<bool> {
        let held: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM invoices WHERE number = ?1 AND id < ?2)",
        )
        .bind(number)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(held)
    }

    /// Rewrites the number of one invoice. Maintenance only.
    ///
    /// First seen wins: fails with `UniqueViolation` if an invoice with a
    /// lower id already carries `number`, or if the UNIQUE index rejects it.
    /// A higher id holding the same number does not block the write; that
    /// row becomes the duplicate.
    pub async fn update_number(&self, id: i64, number: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE invoices SET number = ?1
            WHERE id = ?2
              AND NOT EXISTS (SELECT 1 FROM invoices WHERE number = ?1 AND id < ?2)
            "#,
        )
        .bind(number)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(id).await? {
                Some(_) => Err(DbError::duplicate("invoices.number", number)),
                None => Err(DbError::not_found("Invoice", id.to_string())),
            };
        }

        debug!(id, number = %number, "Invoice number rewritten");
        Ok(())
    }

    /// Deletes an invoice. Its number is never handed out again.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Invoice", id.to_string()));
        }
        Ok(())
    }

    /// Well-formed numbers of one store and month, in id order.
    pub async fn numbers_in_scope(
        &self,
        store_id: Option<i64>,
        period: Period,
    ) -> DbResult<Vec<InvoiceNumber>> {
        let numbers: Vec<String> = sqlx::query_scalar(
            "SELECT number FROM invoices WHERE store_id IS ?1 AND number LIKE ?2 ORDER BY id",
        )
        .bind(store_id)
        .bind(format!("{}-%", period))
        .fetch_all(&self.pool)
        .await?;

        Ok(numbers
            .iter()
            .filter_map(|n| InvoiceNumber::parse(n).ok())
            .filter(|n| n.period() == period)
            .collect())
    }

    /// Creates the UNIQUE index on `invoices(number)`.
    ///
    /// Only succeeds on a duplicate-free table. Returns `true` if the index
    /// was created by this call.
    pub async fn ensure_number_index(&self) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
        )
        .bind(NUMBER_INDEX)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            return Ok(false);
        }

        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON invoices(number)",
            NUMBER_INDEX
        ))
        .execute(&self.pool)
        .await?;

        info!(index = NUMBER_INDEX, "Unique invoice number index created");
        Ok(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
