//! # Table Registry
//!
//! The closed set of tables a backend will touch, and the checks every
//! backend runs before SQL (or the in-memory map) sees a name or a row.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  <table>                                                                │
//! │  ├── id          INTEGER (serial) or TEXT (uuid)                       │
//! │  ├── company_id  INTEGER, tenant key                                   │
//! │  ├── data        TEXT, JSON object of the entity's own fields          │
//! │  ├── created_at  TEXT, RFC 3339, set on insert                         │
//! │  └── updated_at  TEXT, RFC 3339, set on insert and update              │
//! │                                                                         │
//! │  API row = data ∪ {id, company_id, created_at, updated_at}             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use hris_core::validation::validate_column_name;
use hris_core::{AnyRow, EntityKind, IdStrategy, NotificationPayload, RowId, RowPatch, IDENTITY_KEYS};

use crate::error::{DbError, DbResult};

/// Table receiving delivered notifications.
pub const NOTIFICATIONS_TABLE: &str = "notifications";

/// Columns only the backend writes.
pub const SERVER_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

/// What a table's rows must decode into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    Entity(EntityKind),
    Notification,
}

/// One registered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub shape: RowShape,
    pub id_strategy: IdStrategy,
}

impl TableSpec {
    /// Rejects a full API row that does not decode into the table's type.
    pub fn check_row(&self, row: &Value) -> DbResult<()> {
        match self.shape {
            RowShape::Entity(kind) => {
                AnyRow::decode(kind, row.clone())?;
            }
            RowShape::Notification => {
                serde_json::from_value::<NotificationPayload>(row.clone())?;
            }
        }
        Ok(())
    }
}

/// Every registered table, entities first.
pub fn all_tables() -> impl Iterator<Item = TableSpec> {
    EntityKind::ALL
        .into_iter()
        .map(|kind| TableSpec {
            name: kind.table(),
            shape: RowShape::Entity(kind),
            id_strategy: kind.id_strategy(),
        })
        .chain(std::iter::once(TableSpec {
            name: NOTIFICATIONS_TABLE,
            shape: RowShape::Notification,
            id_strategy: IdStrategy::Serial,
        }))
}

/// Looks a table up by name.
pub fn table_spec(table: &str) -> DbResult<TableSpec> {
    all_tables()
        .find(|spec| spec.name == table)
        .ok_or_else(|| DbError::UnknownTable(table.to_string()))
}

/// Checks a filter, order or payload key.
pub fn check_column(column: &str) -> DbResult<()> {
    validate_column_name(column).map_err(|e| DbError::InvalidColumn(e.to_string()))
}

/// True for columns stored outside the `data` JSON object.
pub fn is_physical_column(column: &str) -> bool {
    IDENTITY_KEYS.contains(&column) || SERVER_COLUMNS.contains(&column)
}

/// An insert payload split into physical columns and `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRow {
    /// `None` when the backend assigns a serial id.
    pub id: Option<RowId>,
    pub company_id: i64,
    pub data: Map<String, Value>,
}

/// Validates an insert payload and splits it for storage.
///
/// - `company_id` must be a positive integer
/// - serial tables reject a caller-supplied `id`
/// - uuid tables accept a non-empty string `id` or get a fresh v4
/// - `created_at` / `updated_at` from the caller are dropped
pub fn prepare_insert(spec: &TableSpec, payload: &RowPatch) -> DbResult<NewRow> {
    for key in payload.keys() {
        check_column(key)?;
    }

    let company_id = payload
        .get("company_id")
        .and_then(Value::as_i64)
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            DbError::InvalidPayload("company_id must be a positive integer".to_string())
        })?;

    let id = match (spec.id_strategy, payload.get("id")) {
        (IdStrategy::Serial, None) => None,
        (IdStrategy::Serial, Some(_)) => {
            return Err(DbError::InvalidPayload(format!(
                "id is assigned by the backend for {}",
                spec.name
            )))
        }
        (IdStrategy::Uuid, None) => Some(RowId::Text(Uuid::new_v4().to_string())),
        (IdStrategy::Uuid, Some(Value::String(id))) if !id.trim().is_empty() => {
            Some(RowId::Text(id.clone()))
        }
        (IdStrategy::Uuid, Some(_)) => {
            return Err(DbError::InvalidPayload(format!(
                "id for {} must be a non-empty string",
                spec.name
            )))
        }
    };

    let data = payload
        .as_map()
        .iter()
        .filter(|(key, _)| !is_physical_column(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(NewRow {
        id,
        company_id,
        data,
    })
}

/// Validates an update patch and returns the part stored in `data`.
///
/// Identity keys are rejected; server columns are dropped.
pub fn prepare_patch(patch: &RowPatch) -> DbResult<Map<String, Value>> {
    if patch.is_empty() {
        return Err(DbError::InvalidPayload("patch is empty".to_string()));
    }
    patch.ensure_identity_untouched()?;

    let mut data = Map::new();
    for (key, value) in patch.as_map() {
        check_column(key)?;
        if !SERVER_COLUMNS.contains(&key.as_str()) {
            data.insert(key.clone(), value.clone());
        }
    }
    Ok(data)
}

/// Builds the API row from stored parts.
pub fn compose_row(
    id: &RowId,
    company_id: i64,
    data: &Map<String, Value>,
    created_at: &str,
    updated_at: &str,
) -> Value {
    let mut row = data.clone();
    row.insert("id".to_string(), id.to_json());
    row.insert("company_id".to_string(), Value::from(company_id));
    row.insert("created_at".to_string(), Value::from(created_at));
    row.insert("updated_at".to_string(), Value::from(updated_at));
    Value::Object(row)
}

/// Current time in the format stored in `created_at` / `updated_at`.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339()
}
