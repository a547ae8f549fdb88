//! # hris-core: Pure Domain Logic for PeopleOps HRIS
//!
//! This crate holds the row types, the optimistic mutation engine and the
//! store lifecycle state as pure code with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PeopleOps HRIS Architecture                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    UI / application layer                       │   │
//! │  │    reads rows + loading + errors, calls create/update/delete    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 hris-store (EntityStore, StoreSession)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ hris-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  engine   │  │   state   │  │ validation│  │   │
//! │  │   │  rows     │  │ add/update│  │  loading  │  │  patches  │  │   │
//! │  │   │  RowPatch │  │ remove    │  │  errors   │  │  columns  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    hris-db (Data Service)                       │   │
//! │  │         DataService trait, SQLite + in-memory backends          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Row types, ids, tenant and entity registry
//! - [`engine`] - Identity-keyed list mutations (add, update, remove, restore)
//! - [`state`] - Loading flags, error fields, mutation responses
//! - [`notification`] - Notification drafts and payloads
//! - [`error`] - Domain error types
//! - [`validation`] - Patch and identifier validation
//!
//! ## Example Usage
//!
//! ```rust
//! use hris_core::{engine, Department, EntityRow, RowId, RowPatch};
//! use serde_json::json;
//!
//! let rows = vec![Department::decode(json!({"id": 1, "company_id": 7, "name": "Eng"})).unwrap()];
//! let patched = engine::update(&rows, &RowId::Int(1), &RowPatch::new().set("name", "Engineering"));
//!
//! assert_eq!(patched[0].name, "Engineering");
//! assert_eq!(rows[0].name, "Eng");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod engine;
pub mod error;
pub mod notification;
pub mod state;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use notification::{
    Audience, ChangeEvent, NotificationDraft, NotificationKind, NotificationPayload,
    NotificationPriority,
};
pub use state::{
    error_message, ErrorState, LoadingState, MutationResponse, OperationKind,
    UNKNOWN_ERROR_MESSAGE,
};
pub use types::*;
