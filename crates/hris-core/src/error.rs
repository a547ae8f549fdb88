//! # Error Types
//!
//! Domain-specific error types for hris-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  hris-core errors (this file)                                          │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  hris-db errors (separate crate)                                       │
//! │  └── DbError          - Backend operation failures                     │
//! │                                                                         │
//! │  hris-store errors (separate crate)                                    │
//! │  └── StoreError       - What the store records as an error message     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → StoreError → UI string  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (entity, id, field)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

use crate::types::EntityKind;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
///
/// These errors describe rows that cannot exist in a tenant cache.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The acting user has no resolvable company.
    ///
    /// ## When This Occurs
    /// - Nobody is signed in yet
    /// - The profile has no company attached
    /// - The company id is zero or negative
    #[error("Company ID is required but not available")]
    MissingTenant,

    /// A backend row could not be decoded into its typed variant.
    ///
    /// ## When This Occurs
    /// - A required column is missing from the JSON row
    /// - A column holds the wrong JSON type
    #[error("Invalid {kind} row: {reason}")]
    InvalidRow { kind: EntityKind, reason: String },

    /// A backend row belongs to a different company than the active one.
    #[error("{kind} row {id} belongs to company {actual}, expected {expected}")]
    TenantMismatch {
        kind: EntityKind,
        id: String,
        expected: i64,
        actual: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when a payload or patch doesn't meet requirements.
/// Used for early validation before any backend call is made.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., not a JSON object, bad column name).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Field may not be written by this operation.
    #[error("{field} cannot be changed")]
    Immutable { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
