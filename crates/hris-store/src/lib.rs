//! # hris-store: Entity Stores for PeopleOps HRIS
//!
//! Per-session caches of tenant-scoped HR entities, with optimistic
//! mutations and best-effort notifications.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Store Layer Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  StoreSession (composition root)                 │  │
//! │  │                                                                  │  │
//! │  │  Builds the eight stores in fixed order, bootstraps them once   │  │
//! │  │  a tenant is known, owns the notification worker                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ EntityStore<R> │  │ TenantResolver │  │ NotificationDispatcher │    │
//! │  │                │  │                │  │                        │    │
//! │  │ fetch / create │  │ company_id of  │  │ bounded queue, recipient│   │
//! │  │ update / delete│  │ the acting user│  │ lookup, retry w/backoff│    │
//! │  │ loading+errors │  │                │  │                        │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  hris_db::DataService (SQLite or in-memory)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`store`] - Generic `EntityStore<R>` with optimistic update/delete
//! - [`session`] - `StoreSession` and the per-entity store aliases
//! - [`notify`] - Notification queue, worker, sink and recipient lookup
//! - [`tenant`] - Tenant resolvers
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Store error types
//!
//! ## Usage
//! ```rust,ignore
//! use hris_store::{HrisConfig, SessionTenant, StoreSession};
//!
//! let config = HrisConfig::load(None)?;
//! let tenant = Arc::new(SessionTenant::new(config.company_id()));
//! let session = StoreSession::open(&config, tenant.clone()).await?;
//!
//! let status = session.bootstrap().await;
//! let response = session
//!     .departments()
//!     .update(&RowId::Int(1), RowPatch::new().set("name", "Engineering"))
//!     .await;
//!
//! session.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod notify;
pub mod session;
pub mod store;
pub mod tenant;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::HrisConfig;
pub use error::{StoreError, StoreResult};
pub use notify::{
    BackendDirectory, BackendNotificationSink, DispatchSettings, DispatchSnapshot,
    NotificationDispatcher, NotificationJob, NotificationQueue, NotificationSink,
    RecipientDirectory,
};
pub use session::{
    DepartmentStore, DivisionStore, EmployeeStore, GradeStore, NoticeStore, PositionStore,
    ProjectStore, SessionStatus, StoreSession, TeamStore,
};
pub use store::{EntityStore, StoreStatus};
pub use tenant::{FixedTenant, SessionTenant, TenantResolver};
