//! # Database Handle
//!
//! Opens the SQLite file behind a store session and hands out the
//! [`SqliteDataService`] every entity store shares.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Opening the database                            │
//! │                                                                         │
//! │  HrisConfig [database] ──► DbConfig { path, max_connections,           │
//! │                                       acquire_timeout }                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config)                                                 │
//! │       │  WAL journal, foreign keys on, file created if missing         │
//! │       │  embedded migrations applied                                   │
//! │       ▼                                                                 │
//! │  db.data_service() ──► one SqlitePool shared by all eight stores       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! WAL keeps store fetches from queueing behind a pending mutation.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations::{self, MigrationStatus};
use crate::repository::sqlite::SqliteDataService;

// =============================================================================
// Configuration
// =============================================================================

/// Where the database lives and how many connections the stores may hold.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/hris/hris.db")
///     .max_connections(8)
///     .acquire_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DbConfig {
    pub database_path: PathBuf,
    /// Upper bound on pooled connections. Default: 5
    pub max_connections: u32,
    /// How long a store call waits for a free connection. Default: 30 s
    pub acquire_timeout: Duration,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Private in-memory database for tests.
    ///
    /// Each SQLite connection to `:memory:` gets its own database, so the
    /// pool is pinned to a single connection.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Open database. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database and applies pending
    /// migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening database");

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Off by default in SQLite; the schema relies on them.
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        debug!(max_connections = config.max_connections, "Pool created");

        migrations::run_migrations(&pool).await?;

        Ok(Database { pool })
    }

    /// Data service backing every entity store.
    pub fn data_service(&self) -> SqliteDataService {
        SqliteDataService::new(self.pool.clone())
    }

    /// Embedded versus applied migrations.
    pub async fn migration_status(&self) -> DbResult<MigrationStatus> {
        migrations::migration_status(&self.pool).await
    }

    /// Closes the pool. Data service calls fail afterwards.
    pub async fn close(&self) {
        info!("Closing database");
        self.pool.close().await;
    }
}
