//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       │ Concurrent invoice creation from request workers               │
//! │       ▼                                                                 │
//! │  Worker 1 ──► next(store 3, 2024-03) ─┐                                │
//! │  Worker 2 ──► next(store 3, 2024-03) ─┴─► serialized by write lock     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! Readers never block the allocating writer, and `peek` never waits on it.
//! Writers queue on the database lock for up to `busy_timeout`.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AllocatorSettings;
use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::numbering::NumberAllocator;
use crate::repository::invoice::InvoiceRepository;
use crate::repository::sequence::SequenceStore;
use crate::repository::store::StoreRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Pool and allocator settings for [`Database::new`].
///
/// Migrations always run on connect: the allocator relies on the composite
/// counter index the migrations create.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/factura/factura.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, created when missing. `:memory:` for tests.
    pub database_path: PathBuf,

    /// Pool size. Default: 5
    pub max_connections: u32,

    /// Wait on a locked database before reporting SQLITE_BUSY.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Allocator behavior (zone, retries, collisions).
    pub allocator: AllocatorSettings,
}

/// How long a caller waits for a free pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connections above the first are closed after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            allocator: AllocatorSettings::default(),
        }
    }

    /// Single-connection in-memory database, one per handle.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1, // every connection would get its own database
            ..DbConfig::new(":memory:")
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets how long a writer waits on a locked database.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn allocator(mut self, settings: AllocatorSettings) -> Self {
        self.allocator = settings;
        self
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Holds no numbering state of its own: every accessor hands out a
/// repository over the shared pool, and all coordination goes through SQLite.
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,

    allocator: AllocatorSettings,
}

impl Database {
    /// Opens the pool (WAL, NORMAL synchronous, foreign keys, busy timeout)
    /// and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            allocator: config.allocator,
        };

        db.run_migrations().await?;
        Ok(db)
    }

    /// Runs database migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Allocator settings this handle was opened with.
    pub fn allocator_settings(&self) -> &AllocatorSettings {
        &self.allocator
    }

    /// Returns the store repository.
    pub fn stores(&self) -> StoreRepository {
        StoreRepository::new(self.pool.clone())
    }

    /// Returns the sequence counter store.
    pub fn sequences(&self) -> SequenceStore {
        SequenceStore::new(self.pool.clone(), self.allocator.retry_policy())
    }

    /// Returns the invoice number allocator.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let number = db.allocator().allocate(Some(&store), Utc::now()).await?;
    /// ```
    pub fn allocator(&self) -> NumberAllocator {
        NumberAllocator::new(self.sequences(), self.allocator.time_zone)
    }

    /// Returns the invoice repository.
    pub fn invoices(&self) -> InvoiceRepository {
        InvoiceRepository::new(
            self.pool.clone(),
            self.allocator(),
            self.allocator.collision_retries,
        )
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use factura_core::PeriodZone;

    #[tokio::test]
    async fn test_in_memory_database() {
        let config = DbConfig::in_memory();
        let db = Database::new(config).await.unwrap();

        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.run_migrations().await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();

        assert_eq!(tables, vec!["invoices", "sequence_counters", "stores"]);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let settings = AllocatorSettings {
            time_zone: PeriodZone::Utc,
            ..AllocatorSettings::default()
        };
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .busy_timeout(Duration::from_millis(250))
            .allocator(settings);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.allocator.time_zone, PeriodZone::Utc);

        let memory = DbConfig::in_memory();
        assert_eq!(memory.max_connections, 1);
        assert_eq!(memory.database_path, PathBuf::from(":memory:"));
    }
}
