//! # HRIS Configuration
//!
//! Configuration for a store session: tenant, database and notification
//! delivery.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HRIS_COMPANY_ID=7                                                  │
//! │     HRIS_DB_PATH=/var/lib/hris/hris.db                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/hris/hris.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.peopleops.hris/hris.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     no tenant, <data dir>/hris.db, notifications on                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # hris.toml
//! [tenant]
//! company_id = 7
//!
//! [database]
//! path = "/var/lib/hris/hris.db"
//! max_connections = 5
//! acquire_timeout_secs = 30
//!
//! [notifications]
//! enabled = true
//! queue_capacity = 256
//! max_attempts = 5
//! initial_backoff_ms = 200
//! max_backoff_ms = 10000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use hris_db::DbConfig;

use crate::error::{StoreError, StoreResult};
use crate::notify::DispatchSettings;

const CONFIG_FILE: &str = "hris.toml";
const DATABASE_FILE: &str = "hris.db";

// =============================================================================
// Tenant Settings
// =============================================================================

/// Tenant used when the session is not told otherwise.
///
/// Interactive sessions normally leave this unset and set the tenant at
/// sign-in; tools such as the seeder pin it here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<i64>,
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `hris.db` in the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds a store call waits for a pooled connection.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

// =============================================================================
// Notification Settings
// =============================================================================

/// Delivery policy for notice and project notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// When false, stores are built without a notification queue.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Attempts per notification, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    200
}
fn default_max_backoff() -> u64 {
    10_000
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            enabled: true,
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HrisConfig {
    #[serde(default)]
    pub tenant: TenantSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl HrisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (hris.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> StoreResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading HRIS config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides_from(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load HRIS config: {}. Using defaults.", e);
            Self::default()
        })
    }

    fn from_file(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> StoreResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| StoreError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| StoreError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "HRIS config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> StoreResult<()> {
        if let Some(company_id) = self.tenant.company_id {
            if company_id <= 0 {
                return Err(StoreError::InvalidConfig(format!(
                    "tenant.company_id must be positive, got {}",
                    company_id
                )));
            }
        }

        if self.database.max_connections == 0 {
            return Err(StoreError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.database.acquire_timeout_secs == 0 {
            return Err(StoreError::InvalidConfig(
                "database.acquire_timeout_secs must be greater than 0".into(),
            ));
        }

        let notifications = &self.notifications;
        if notifications.queue_capacity == 0 {
            return Err(StoreError::InvalidConfig(
                "notifications.queue_capacity must be greater than 0".into(),
            ));
        }
        if notifications.max_attempts == 0 {
            return Err(StoreError::InvalidConfig(
                "notifications.max_attempts must be at least 1".into(),
            ));
        }
        if notifications.initial_backoff_ms > notifications.max_backoff_ms {
            return Err(StoreError::InvalidConfig(format!(
                "notifications.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                notifications.initial_backoff_ms, notifications.max_backoff_ms
            )));
        }

        Ok(())
    }

    /// Applies `HRIS_*` overrides read through `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("HRIS_COMPANY_ID") {
            match raw.parse::<i64>() {
                Ok(company_id) => {
                    debug!(company_id, "Overriding company id from environment");
                    self.tenant.company_id = Some(company_id);
                }
                Err(_) => warn!(value = %raw, "Ignoring invalid HRIS_COMPANY_ID"),
            }
        }

        if let Some(path) = lookup("HRIS_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup("HRIS_NOTIFICATIONS_ENABLED") {
            match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.notifications.enabled = true,
                "0" | "false" | "no" | "off" => self.notifications.enabled = false,
                _ => warn!(value = %raw, "Ignoring invalid HRIS_NOTIFICATIONS_ENABLED"),
            }
        }

        if let Some(raw) = lookup("HRIS_NOTIFY_MAX_ATTEMPTS") {
            match raw.parse::<u32>() {
                Ok(attempts) => self.notifications.max_attempts = attempts,
                Err(_) => warn!(value = %raw, "Ignoring invalid HRIS_NOTIFY_MAX_ATTEMPTS"),
            }
        }

        if let Some(raw) = lookup("HRIS_NOTIFY_QUEUE_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(capacity) => self.notifications.queue_capacity = capacity,
                Err(_) => warn!(value = %raw, "Ignoring invalid HRIS_NOTIFY_QUEUE_CAPACITY"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "peopleops", "hris")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Configured database file, or `hris.db` in the platform data directory.
    pub fn database_path(&self) -> StoreResult<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        directories::ProjectDirs::from("com", "peopleops", "hris")
            .map(|dirs| dirs.data_dir().join(DATABASE_FILE))
            .ok_or_else(|| StoreError::InvalidConfig("No data directory available".into()))
    }

    pub fn db_config(&self) -> StoreResult<DbConfig> {
        Ok(DbConfig::new(self.database_path()?)
            .max_connections(self.database.max_connections)
            .acquire_timeout(Duration::from_secs(self.database.acquire_timeout_secs)))
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            queue_capacity: self.notifications.queue_capacity,
            max_attempts: self.notifications.max_attempts,
            initial_backoff: Duration::from_millis(self.notifications.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.notifications.max_backoff_ms),
        }
    }

    pub fn company_id(&self) -> Option<i64> {
        self.tenant.company_id
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications.enabled
    }
}
