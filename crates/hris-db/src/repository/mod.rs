//! # Repository Module
//!
//! [`DataService`](crate::DataService) implementations.
//!
//! ## Backends
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  EntityStore<R>                                                        │
//! │       │                                                                 │
//! │       │  Arc<dyn DataService>                                          │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────┐     ┌──────────────────────────┐         │
//! │  │  SqliteDataService       │     │  MemoryDataService       │         │
//! │  │  SqlitePool, JSON column │     │  HashMap of JSON rows    │         │
//! │  └──────────────────────────┘     └──────────────────────────┘         │
//! │                                                                         │
//! │  Both run the same registry checks (crate::schema) so a store sees     │
//! │  identical errors from either backend.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod memory;
pub mod sqlite;
