//! # Store Repository
//!
//! Stores are read-only input for numbering. The repository exists so the
//! create hook can resolve `store_id` into a name, and so renames can be
//! shown not to touch already-issued numbers.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use factura_core::validation::validate_store_name;
use factura_core::Store;

/// Repository for store database operations.
#[derive(Debug, Clone)]
pub struct StoreRepository {
    pool: SqlitePool,
}

impl StoreRepository {
    /// Creates a new StoreRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StoreRepository { pool }
    }

    /// Inserts a store and returns the stored row.
    pub async fn insert(&self, name: &str) -> DbResult<Store> {
        validate_store_name(name)?;

        let store = sqlx::query_as::<_, Store>(
            r#"
            INSERT INTO stores (name, created_at)
            VALUES (?1, ?2)
            RETURNING id, name, created_at
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        info!(id = store.id, name = %store.name, "Store created");
        Ok(store)
    }

    /// Gets a store by its ID.
    ///
    /// ## Returns
    /// * `Ok(Some(Store))` - Store found
    /// * `Ok(None)` - Store not found
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Store>> {
        let store = sqlx::query_as::<_, Store>(
            "SELECT id, name, created_at FROM stores WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(store)
    }

    /// Renames a store. Numbers already issued keep their old tag.
    pub async fn rename(&self, id: i64, name: &str) -> DbResult<()> {
        validate_store_name(name)?;

        debug!(id, name = %name, "Renaming store");

        let result = sqlx::query("UPDATE stores SET name = ?1 WHERE id = ?2")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Store", id.to_string()));
        }

        Ok(())
    }
}
