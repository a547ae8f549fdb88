//! # Optimistic Mutation Engine
//!
//! Identity-keyed list operations shared by every entity store.
//!
//! ## Where These Run
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Store mutation timeline                                 │
//! │                                                                         │
//! │  update(id, patch)                                                     │
//! │    snapshot = rows.clone()                                             │
//! │    rows = engine::update(rows, id, patch)      ← optimistic            │
//! │    ... backend call ...                                                │
//! │    ok  → rows = engine::replace(rows, server_row)   ← reconcile        │
//! │    err → rows = engine::restore(rows, snapshot, id) ← rollback         │
//! │                                                                         │
//! │  delete(id)                                                            │
//! │    rows = engine::remove(rows, id)             ← optimistic            │
//! │    err → rows = engine::restore(rows, snapshot, id)                    │
//! │                                                                         │
//! │  create(data)                                                          │
//! │    ok  → rows = engine::add(rows, server_row)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//! Every function is pure, synchronous and total: inputs are borrowed, a new
//! list is returned, and a missing id is a no-op rather than an error.

use crate::error::ValidationError;
use crate::types::{EntityRow, RowId, RowPatch};

/// Appends a row. Uniqueness is the backend's job, not ours.
pub fn add<R: Clone>(items: &[R], new_item: R) -> Vec<R> {
    let mut out = Vec::with_capacity(items.len() + 1);
    out.extend_from_slice(items);
    out.push(new_item);
    out
}

/// Shallow-merges `patch` into the row with `id`.
///
/// A patch that would produce an invalid row (wrong JSON type for a column)
/// leaves the row unchanged; stores validate patches with [`merge_patch`]
/// before calling this.
pub fn update<R: EntityRow>(items: &[R], id: &RowId, patch: &RowPatch) -> Vec<R> {
    items
        .iter()
        .map(|row| {
            if row.id() == id {
                merge_patch(row, patch).unwrap_or_else(|_| row.clone())
            } else {
                row.clone()
            }
        })
        .collect()
}

/// Drops the row with `id`.
pub fn remove<R: EntityRow>(items: &[R], id: &RowId) -> Vec<R> {
    items.iter().filter(|row| row.id() != id).cloned().collect()
}

/// Swaps in an authoritative row for the cached row with the same id.
///
/// Rows that are no longer cached are not re-added.
pub fn replace<R: EntityRow>(items: &[R], row: R) -> Vec<R> {
    items
        .iter()
        .map(|existing| {
            if existing.id() == row.id() {
                row.clone()
            } else {
                existing.clone()
            }
        })
        .collect()
}

/// Puts the snapshot's version of one row back.
///
/// - Row in snapshot and in `items`: overwritten in place.
/// - Row in snapshot only (it was removed): re-inserted at its old index.
/// - Row not in snapshot: removed.
///
/// When nothing else touched the list in between, the result equals the
/// snapshot exactly.
pub fn restore<R: EntityRow>(items: &[R], snapshot: &[R], id: &RowId) -> Vec<R> {
    let Some(original_index) = snapshot.iter().position(|row| row.id() == id) else {
        return remove(items, id);
    };
    let prior = snapshot[original_index].clone();

    let mut out = items.to_vec();
    match out.iter().position(|row| row.id() == id) {
        Some(current_index) => out[current_index] = prior,
        None => {
            let at = original_index.min(out.len());
            out.insert(at, prior);
        }
    }
    out
}

/// Finds a row by id.
pub fn find<'a, R: EntityRow>(items: &'a [R], id: &RowId) -> Option<&'a R> {
    items.iter().find(|row| row.id() == id)
}

/// Produces `row` with every key of `patch` overwritten.
pub fn merge_patch<R: EntityRow>(row: &R, patch: &RowPatch) -> Result<R, ValidationError> {
    let mut merged = RowPatch::from_row(row)?.into_map();
    for (key, value) in patch.as_map() {
        merged.insert(key.clone(), value.clone());
    }

    serde_json::from_value(serde_json::Value::Object(merged)).map_err(|e| {
        ValidationError::InvalidFormat {
            field: "patch".to_string(),
            reason: e.to_string(),
        }
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
