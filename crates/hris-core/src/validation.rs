//! # Validation Module
//!
//! Input validation for create payloads, update patches and backend
//! identifiers.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: EntityStore (hris-store)                                     │
//! │  ├── Tenant present                                                    │
//! │  └── THIS MODULE: patch shape, identity keys, column names             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: DataService (hris-db)                                        │
//! │  ├── Table registry lookup                                             │
//! │  └── Row decoded into AnyRow before commit                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── CHECK (json_valid(data))                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use hris_core::validation::{validate_column_name, validate_update_patch};
//! use hris_core::RowPatch;
//!
//! validate_column_name("first_name").unwrap();
//! validate_update_patch(&RowPatch::new().set("name", "Ops")).unwrap();
//! ```

use serde_json::Value;

use crate::error::ValidationError;
use crate::types::RowPatch;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest column name accepted in a filter, order or patch key.
pub const MAX_COLUMN_NAME_LEN: usize = 64;

/// Longest free-text value accepted for a required text column.
pub const MAX_TEXT_LEN: usize = 500;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a column name used as a filter, order key or patch key.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Lowercase ASCII letters, digits and underscores; must not start with a
///   digit
///
/// Column names end up inside `json_extract` paths, so anything else is
/// rejected outright.
///
/// ## Example
/// ```rust
/// use hris_core::validation::validate_column_name;
///
/// assert!(validate_column_name("department_id").is_ok());
/// assert!(validate_column_name("name'); DROP TABLE x;--").is_err());
/// ```
pub fn validate_column_name(column: &str) -> ValidationResult<()> {
    if column.is_empty() {
        return Err(ValidationError::Required {
            field: "column".to_string(),
        });
    }

    if column.len() > MAX_COLUMN_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "column".to_string(),
            max: MAX_COLUMN_NAME_LEN,
        });
    }

    let starts_with_digit = column.chars().next().is_some_and(|c| c.is_ascii_digit());
    let valid_chars = column
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if starts_with_digit || !valid_chars {
        return Err(ValidationError::InvalidFormat {
            field: column.to_string(),
            reason: "column names must be lowercase letters, digits and underscores".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Patch Validators
// =============================================================================

/// Validates an update patch.
///
/// ## Rules
/// - Must contain at least one key
/// - Must not contain `id` or `company_id`
/// - Every key must be a valid column name
pub fn validate_update_patch(patch: &RowPatch) -> ValidationResult<()> {
    if patch.is_empty() {
        return Err(ValidationError::Required {
            field: "patch".to_string(),
        });
    }

    patch.ensure_identity_untouched()?;

    for key in patch.keys() {
        validate_column_name(key)?;
    }

    Ok(())
}

/// Validates a create payload before the tenant key is injected.
///
/// An `id` is allowed (UUID tables accept caller-chosen ids). A
/// `company_id` is not: the store always supplies the active tenant.
pub fn validate_create_payload(payload: &RowPatch) -> ValidationResult<()> {
    if payload.contains_key("company_id") {
        return Err(ValidationError::Immutable {
            field: "company_id".to_string(),
        });
    }

    for key in payload.keys() {
        validate_column_name(key)?;
    }

    Ok(())
}

/// Validates a required free-text column of a payload.
///
/// ## Rules
/// - Must be present and a JSON string
/// - Must not be blank after trimming
/// - At most 500 characters
pub fn validate_required_text(payload: &RowPatch, field: &str) -> ValidationResult<()> {
    let text = match payload.get(field) {
        Some(Value::String(text)) => text.trim(),
        Some(Value::Null) | None => {
            return Err(ValidationError::Required {
                field: field.to_string(),
            })
        }
        Some(_) => {
            return Err(ValidationError::InvalidFormat {
                field: field.to_string(),
                reason: "expected a string".to_string(),
            })
        }
    };

    if text.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if text.chars().count() > MAX_TEXT_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
