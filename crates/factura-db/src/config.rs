//! # Numbering Configuration
//!
//! Configuration for the database, the allocator and the repair routine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FACTURA_DB_PATH=/var/lib/factura/factura.db                        │
//! │     FACTURA_TIME_ZONE=utc                                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/factura/factura.toml (Linux)                             │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "factura.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [allocator]
//! time_zone = "local"
//! max_attempts = 5
//! initial_backoff_ms = 10
//! max_backoff_ms = 250
//! collision_retries = 3
//!
//! [repair]
//! period = "wall_clock"
//! batch_size = 500
//! sync_counters = true
//! ```

use factura_core::PeriodZone;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on a locked database before SQLITE_BUSY.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("factura.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Allocator Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorSettings {
    /// Zone used to derive YYYY-MM from invoice timestamps.
    #[serde(default)]
    pub time_zone: PeriodZone,

    /// Attempts before a contended allocation reports "sequence unavailable".
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Extra counter advances tried when a tag collision blocks an insert.
    #[serde(default = "default_collision_retries")]
    pub collision_retries: u32,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    10
}
fn default_max_backoff() -> u64 {
    250
}
fn default_collision_retries() -> u32 {
    3
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        AllocatorSettings {
            time_zone: PeriodZone::default(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            collision_retries: default_collision_retries(),
        }
    }
}

impl AllocatorSettings {
    /// Retry policy of the sequence store.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Bounded exponential backoff for transient contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        AllocatorSettings::default().retry_policy()
    }
}

// =============================================================================
// Repair Settings
// =============================================================================

/// Which month a repaired invoice number is stamped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPeriod {
    /// The month the repair runs in (batch-marker semantics).
    #[default]
    WallClock,
    /// The month the invoice was created in.
    CreatedAt,
}

impl fmt::Display for RepairPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairPeriod::WallClock => write!(f, "wall_clock"),
            RepairPeriod::CreatedAt => write!(f, "created_at"),
        }
    }
}

impl FromStr for RepairPeriod {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wall_clock" | "wallclock" | "now" => Ok(RepairPeriod::WallClock),
            "created_at" | "created" => Ok(RepairPeriod::CreatedAt),
            other => Err(DbError::InvalidConfig(format!(
                "Unknown repair period: '{}'. Valid options: wall_clock, created_at",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSettings {
    #[serde(default)]
    pub period: RepairPeriod,

    /// Invoices read per keyset page.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Raise each scope counter to the highest NNNN present after repair.
    #[serde(default = "default_true")]
    pub sync_counters: bool,
}

fn default_batch_size() -> u32 {
    500
}
fn default_true() -> bool {
    true
}

impl Default for RepairSettings {
    fn default() -> Self {
        RepairSettings {
            period: RepairPeriod::default(),
            batch_size: default_batch_size(),
            sync_counters: true,
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete numbering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacturaConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub allocator: AllocatorSettings,

    #[serde(default)]
    pub repair: RepairSettings,
}

impl FacturaConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (factura.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document; missing sections fall back to defaults.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::InvalidConfig("database.path must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.allocator.max_attempts == 0 {
            return Err(DbError::InvalidConfig(
                "allocator.max_attempts must be greater than 0".into(),
            ));
        }
        if self.allocator.initial_backoff_ms > self.allocator.max_backoff_ms {
            return Err(DbError::InvalidConfig(
                "allocator.initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }
        if self.repair.batch_size == 0 {
            return Err(DbError::InvalidConfig(
                "repair.batch_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Pool configuration derived from the `[database]` and `[allocator]` sections.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
            .allocator(self.allocator.clone())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FACTURA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(zone) = std::env::var("FACTURA_TIME_ZONE") {
            match zone.parse() {
                Ok(parsed) => self.allocator.time_zone = parsed,
                Err(_) => warn!(zone = %zone, "Unknown time zone in environment"),
            }
        }

        if let Ok(attempts) = std::env::var("FACTURA_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                self.allocator.max_attempts = n;
            }
        }

        if let Ok(period) = std::env::var("FACTURA_REPAIR_PERIOD") {
            match period.parse() {
                Ok(parsed) => self.repair.period = parsed,
                Err(_) => warn!(period = %period, "Unknown repair period in environment"),
            }
        }

        if let Ok(size) = std::env::var("FACTURA_REPAIR_BATCH_SIZE") {
            if let Ok(n) = size.parse::<u32>() {
                self.repair.batch_size = n;
            }
        }

        if let Ok(sync) = std::env::var("FACTURA_REPAIR_SYNC_COUNTERS") {
            if let Ok(flag) = sync.parse::<bool>() {
                self.repair.sync_counters = flag;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "factura", "factura")
            .map(|dirs| dirs.config_dir().join("factura.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FacturaConfig::default();
        assert_eq!(config.allocator.max_attempts, 5);
        assert_eq!(config.allocator.time_zone, PeriodZone::Local);
        assert_eq!(config.repair.period, RepairPeriod::WallClock);
        assert!(config.repair.sync_counters);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = FacturaConfig::from_toml(
            r#"
            [allocator]
            time_zone = "utc"

            [repair]
            period = "created_at"
            batch_size = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.allocator.time_zone, PeriodZone::Utc);
        assert_eq!(config.allocator.max_attempts, 5);
        assert_eq!(config.repair.period, RepairPeriod::CreatedAt);
        assert_eq!(config.repair.batch_size, 50);
        assert_eq!(config.database.path, PathBuf::from("factura.db"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = FacturaConfig::default();
        config.repair.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = FacturaConfig::default();
        config.allocator.initial_backoff_ms = 1000;
        config.allocator.max_backoff_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repair_period_parsing() {
        assert_eq!("wall_clock".parse::<RepairPeriod>().unwrap(), RepairPeriod::WallClock);
        assert_eq!("created_at".parse::<RepairPeriod>().unwrap(), RepairPeriod::CreatedAt);
        assert!("yesterday".parse::<RepairPeriod>().is_err());
    }

    #[test]
    fn test_retry_policy() {
        let policy = AllocatorSettings::default().retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_db_config_carries_allocator() {
        let mut config = FacturaConfig::default();
        config.allocator.time_zone = PeriodZone::Utc;
        config.database.busy_timeout_ms = 250;

        let db_config = config.db_config();
        assert_eq!(db_config.allocator.time_zone, PeriodZone::Utc);
        assert_eq!(db_config.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_toml_serialization() {
        let toml_str = toml::to_string_pretty(&FacturaConfig::default()).unwrap();
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[allocator]"));
        assert!(toml_str.contains("[repair]"));
    }
}
