//! # Store Error Types
//!
//! Error types for store, notification and configuration operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Store Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Precondition   │  │    Backend      │  │     Boundary            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  MissingTenant  │  │  Backend(Db)    │  │  Decode                 │ │
//! │  │  Validation     │  │                 │  │  TenantMismatch         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Notification   │  │ Configuration   │                              │
//! │  │                 │  │                 │                              │
//! │  │  Notification   │  │ InvalidConfig   │                              │
//! │  │  ChannelError   │  │ ConfigLoad/Save │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Store operations never return these to their callers. They are rendered
//! into the store's error fields and `MutationResponse::Failure` messages.

use hris_core::{CoreError, EntityKind, ValidationError};
use hris_db::DbError;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    // =========================================================================
    // Precondition Errors
    // =========================================================================
    /// No valid company id for the acting user.
    #[error("Company ID is required but not available")]
    MissingTenant,

    /// Payload or patch rejected before reaching the backend.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// The data service reported a failure.
    #[error(transparent)]
    Backend(#[from] DbError),

    // =========================================================================
    // Boundary Errors
    // =========================================================================
    /// The backend returned a row that does not decode into its type.
    #[error("Invalid {kind} row from backend: {reason}")]
    Decode { kind: EntityKind, reason: String },

    /// The backend returned a row of another company.
    #[error("{kind} row {id} belongs to company {actual}, expected {expected}")]
    TenantMismatch {
        kind: EntityKind,
        id: String,
        expected: i64,
        actual: i64,
    },

    // =========================================================================
    // Notification Errors
    // =========================================================================
    /// Recipient lookup or delivery failed.
    #[error("Notification failed: {0}")]
    Notification(String),

    /// Dispatcher channel is full or closed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingTenant => StoreError::MissingTenant,
            CoreError::InvalidRow { kind, reason } => StoreError::Decode { kind, reason },
            CoreError::TenantMismatch {
                kind,
                id,
                expected,
                actual,
            } => StoreError::TenantMismatch {
                kind,
                id,
                expected,
                actual,
            },
            CoreError::Validation(err) => StoreError::Validation(err),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(err: toml::ser::Error) -> Self {
        StoreError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl StoreError {
    /// Returns true if a notification delivery hitting this error may
    /// succeed on a later attempt.
    ///
    /// ## Non-Retryable Errors
    /// - Payloads the backend rejects as malformed
    /// - Unknown tables or columns
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Backend(err) => matches!(
                err,
                DbError::ConnectionFailed(_) | DbError::QueryFailed(_) | DbError::Internal(_)
            ),
            StoreError::Notification(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidConfig(_)
                | StoreError::ConfigLoadFailed(_)
                | StoreError::ConfigSaveFailed(_)
        )
    }
}
