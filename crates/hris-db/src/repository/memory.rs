//! # In-Memory Data Service
//!
//! [`DataService`] over plain maps, with the same validation and ordering
//! rules as the SQLite service. Used by store tests and by callers that run
//! without a database file.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use hris_core::{RowId, RowPatch};

use crate::error::{DbError, DbResult};
use crate::schema::{
    check_column, compose_row, prepare_insert, prepare_patch, table_spec, timestamp,
};
use crate::service::{DataService, RowFilter, SelectQuery};

#[derive(Debug, Default)]
struct MemoryTables {
    rows: HashMap<&'static str, Vec<Value>>,
    last_serial: HashMap<&'static str, i64>,
}

/// In-memory data service.
#[derive(Debug, Default)]
pub struct MemoryDataService {
    tables: Mutex<MemoryTables>,
}

impl MemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores rows verbatim, without shape or tenant checks.
    ///
    /// Lets tests plant rows a real backend would never return.
    pub fn seed_rows(&self, table: &str, rows: impl IntoIterator<Item = Value>) -> DbResult<()> {
        let spec = table_spec(table)?;
        let mut tables = self.lock();
        for row in rows {
            if let Some(id) = row.get("id").and_then(Value::as_i64) {
                let last = tables.last_serial.entry(spec.name).or_insert(0);
                *last = (*last).max(id);
            }
            tables.rows.entry(spec.name).or_default().push(row);
        }
        Ok(())
    }

    /// Snapshot of everything stored in `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().rows.get(table).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn matches(row: &Value, column: &str, expected: &Value) -> bool {
    match row.get(column) {
        Some(actual) => actual == expected,
        None => expected.is_null(),
    }
}

fn matches_filter(row: &Value, filter: &RowFilter) -> bool {
    row.get("id") == Some(&filter.id.to_json())
        && row.get("company_id").and_then(Value::as_i64) == Some(filter.company_id)
}

/// SQLite's cross-type order: NULL, then numbers, then text, then the rest.
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }
    fn number(value: &Value) -> f64 {
        match value {
            Value::Bool(flag) => f64::from(u8::from(*flag)),
            other => other.as_f64().unwrap_or_default(),
        }
    }

    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(a), Some(b)) if rank(Some(a)) == 1 && rank(Some(b)) == 1 => {
            number(a).partial_cmp(&number(b)).unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

#[async_trait]
impl DataService for MemoryDataService {
    async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Value>> {
        let spec = table_spec(query.table())?;
        for (column, _) in query.filters() {
            check_column(column)?;
        }
        if let Some(column) = query.order_by() {
            check_column(column)?;
        }

        let mut rows: Vec<Value> = self
            .lock()
            .rows
            .get(spec.name)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        query
                            .filters()
                            .iter()
                            .all(|(column, value)| matches(row, column, value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            let by_order = query
                .order_by()
                .map(|column| compare_json(a.get(column), b.get(column)))
                .unwrap_or(Ordering::Equal);
            by_order.then_with(|| compare_json(a.get("id"), b.get("id")))
        });

        debug!(table = %spec.name, rows = rows.len(), "Selected rows");
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: &RowPatch) -> DbResult<Value> {
        let spec = table_spec(table)?;
        let new_row = prepare_insert(&spec, row)?;
        let now = timestamp();

        let mut tables = self.lock();

        let id = match new_row.id {
            Some(id) => {
                let taken = tables
                    .rows
                    .get(spec.name)
                    .is_some_and(|rows| rows.iter().any(|r| r.get("id") == Some(&id.to_json())));
                if taken {
                    return Err(DbError::duplicate(format!("{}.id", spec.name), id.to_string()));
                }
                id
            }
            None => {
                let last = tables.last_serial.get(spec.name).copied().unwrap_or(0);
                RowId::Int(last + 1)
            }
        };

        let stored = compose_row(&id, new_row.company_id, &new_row.data, &now, &now);
        spec.check_row(&stored)?;

        if let RowId::Int(serial) = id {
            tables.last_serial.insert(spec.name, serial);
        }
        tables.rows.entry(spec.name).or_default().push(stored.clone());

        Ok(stored)
    }

    async fn update(&self, table: &str, filter: &RowFilter, patch: &RowPatch) -> DbResult<Value> {
        let spec = table_spec(table)?;
        let changes = prepare_patch(patch)?;

        let mut tables = self.lock();
        let existing = tables
            .rows
            .get_mut(spec.name)
            .and_then(|rows| rows.iter_mut().find(|row| matches_filter(row, filter)))
            .ok_or_else(|| DbError::not_found(spec.name, filter.id.to_string()))?;

        let mut merged = existing.clone();
        if let Value::Object(map) = &mut merged {
            map.extend(changes);
            map.insert("updated_at".to_string(), Value::from(timestamp()));
        }
        spec.check_row(&merged)?;

        *existing = merged.clone();
        Ok(merged)
    }

    async fn delete(&self, table: &str, filter: &RowFilter) -> DbResult<()> {
        let spec = table_spec(table)?;

        let mut tables = self.lock();
        let rows = tables.rows.entry(spec.name).or_default();
        let before = rows.len();
        rows.retain(|row| !matches_filter(row, filter));

        if rows.len() == before {
            return Err(DbError::not_found(spec.name, filter.id.to_string()));
        }
        Ok(())
    }
}
