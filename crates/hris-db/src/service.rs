//! # Data Service
//!
//! The seam between entity stores and the relational backend.
//!
//! ## Query Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Store operation          DataService call                              │
//! │  ───────────────          ────────────────                              │
//! │  fetch                    select(SelectQuery::from("departments")       │
//! │                                    .eq("company_id", 7)                 │
//! │                                    .order("name"))                      │
//! │  create(data)             insert("departments", data + company_id)      │
//! │  update(id, patch)        update("departments", RowFilter{id, 7}, patch)│
//! │  delete(id)               delete("departments", RowFilter{id, 7})       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows travel as JSON objects. Every object contains `id`, `company_id`,
//! `created_at` and `updated_at` next to the entity's own fields.

use async_trait::async_trait;
use serde_json::Value;

use hris_core::{RowId, RowPatch};

use crate::error::DbResult;

/// Filtered, ordered select on one table.
///
/// ## Example
/// ```rust
/// use hris_db::SelectQuery;
///
/// let query = SelectQuery::from("employees")
///     .eq("company_id", 7)
///     .eq("department_id", 2)
///     .order("first_name");
/// assert_eq!(query.filters().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    table: String,
    filters: Vec<(String, Value)>,
    order_by: Option<String>,
}

impl SelectQuery {
    /// Starts a select on `table`.
    pub fn from(table: impl Into<String>) -> Self {
        SelectQuery {
            table: table.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    /// Adds an equality filter.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// Orders ascending by `column`, ties broken by id.
    pub fn order(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    pub fn order_by(&self) -> Option<&str> {
        self.order_by.as_deref()
    }
}

/// Identifies exactly one row of one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    pub id: RowId,
    pub company_id: i64,
}

impl RowFilter {
    pub fn new(id: RowId, company_id: i64) -> Self {
        RowFilter { id, company_id }
    }
}

/// Backend query client.
///
/// ## Contract
/// - `select` returns every row matching all filters, ordered by the order
///   column (ascending) then by id
/// - `insert` assigns the id when the table uses serial ids, stamps
///   `created_at`/`updated_at`, and returns the stored row
/// - `update` merges `patch` into the stored row and returns the result;
///   no matching row is `DbError::NotFound`
/// - `delete` removes the row; no matching row is `DbError::NotFound`
/// - Table and column names are checked against the registry before any
///   work is done; rows are checked against their typed shape before commit
#[async_trait]
pub trait DataService: Send + Sync {
    async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Value>>;

    async fn insert(&self, table: &str, row: &RowPatch) -> DbResult<Value>;

    async fn update(&self, table: &str, filter: &RowFilter, patch: &RowPatch) -> DbResult<Value>;

    async fn delete(&self, table: &str, filter: &RowFilter) -> DbResult<()>;
}
