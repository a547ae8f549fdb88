//! # hris-db: Data Service for PeopleOps HRIS
//!
//! This crate is the backend every entity store talks to: a small
//! select/insert/update/delete client over tenant-scoped tables.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PeopleOps HRIS Data Flow                         │
//! │                                                                         │
//! │  EntityStore::fetch / create / update / delete                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     hris-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  DataService  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (service.rs)  │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Sqlite impl   │    │ 001_init.sql │  │   │
//! │  │   │ Connection    │    │ Memory impl   │    │              │  │   │
//! │  │   │ Management    │    │ schema checks │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/com.peopleops.hris/hris.db                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`service`] - The `DataService` trait, `SelectQuery`, `RowFilter`
//! - [`schema`] - Table registry and row/column checks
//! - [`repository`] - SQLite and in-memory implementations
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hris_db::{Database, DataService, DbConfig, SelectQuery};
//!
//! let db = Database::new(DbConfig::new("hris.db")).await?;
//! let backend = db.data_service();
//!
//! let rows = backend
//!     .select(&SelectQuery::from("departments").eq("company_id", 7).order("name"))
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod schema;
pub mod service;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig};
pub use repository::memory::MemoryDataService;
pub use repository::sqlite::SqliteDataService;
pub use schema::NOTIFICATIONS_TABLE;
pub use service::{DataService, RowFilter, SelectQuery};
