//! # Store Lifecycle State
//!
//! Loading flags, error fields and the mutation response shared by every
//! entity store.
//!
//! ## Per-Operation State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   idle ──start──► in-flight (loading = true, error = None)             │
//! │                        │                                                │
//! │              ┌─────────┴─────────┐                                      │
//! │              ▼                   ▼                                      │
//! │   success: idle, loading=false   failure: idle, loading=false,         │
//! │            cache updated                  error = Some(msg),           │
//! │                                           cache rolled back            │
//! │                                           (update / delete only)       │
//! │                                                                         │
//! │  The four kinds are independent: a create and a delete can both be     │
//! │  in flight, and each flag clears on its own completion.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stale Errors
//! An error field is cleared when its operation *starts*, not when it
//! succeeds. A failure followed by nothing leaves the message in place until
//! the next call of that kind or [`ErrorState::clear`].

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Fallback when an error renders to an empty message.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";

/// The four operation kinds a store tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Fetch,
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Fetch => write!(f, "fetch"),
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Four independent in-flight flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingState {
    pub fetching: bool,
    pub creating: bool,
    pub updating: bool,
    pub deleting: bool,
}

impl LoadingState {
    pub fn set(&mut self, kind: OperationKind, value: bool) {
        match kind {
            OperationKind::Fetch => self.fetching = value,
            OperationKind::Create => self.creating = value,
            OperationKind::Update => self.updating = value,
            OperationKind::Delete => self.deleting = value,
        }
    }

    pub fn get(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Fetch => self.fetching,
            OperationKind::Create => self.creating,
            OperationKind::Update => self.updating,
            OperationKind::Delete => self.deleting,
        }
    }

    /// True while any operation is in flight.
    pub fn any(&self) -> bool {
        self.fetching || self.creating || self.updating || self.deleting
    }
}

/// Four independent last-error messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorState {
    pub fetch_error: Option<String>,
    pub create_error: Option<String>,
    pub update_error: Option<String>,
    pub delete_error: Option<String>,
}

impl ErrorState {
    pub fn set(&mut self, kind: OperationKind, message: Option<String>) {
        match kind {
            OperationKind::Fetch => self.fetch_error = message,
            OperationKind::Create => self.create_error = message,
            OperationKind::Update => self.update_error = message,
            OperationKind::Delete => self.delete_error = message,
        }
    }

    pub fn get(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Fetch => self.fetch_error.as_deref(),
            OperationKind::Create => self.create_error.as_deref(),
            OperationKind::Update => self.update_error.as_deref(),
            OperationKind::Delete => self.delete_error.as_deref(),
        }
    }

    /// Resets all four fields.
    pub fn clear(&mut self) {
        *self = ErrorState::default();
    }

    pub fn has_any(&self) -> bool {
        self.fetch_error.is_some()
            || self.create_error.is_some()
            || self.update_error.is_some()
            || self.delete_error.is_some()
    }
}

/// Renders an error for an error field, never returning an empty string.
pub fn error_message(err: &dyn std::error::Error) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        UNKNOWN_ERROR_MESSAGE.to_string()
    } else {
        message
    }
}

// =============================================================================
// Mutation Response
// =============================================================================

/// Outcome of a create, update or delete.
///
/// Callers must check [`MutationResponse::is_success`] before trusting the
/// data. Serializes as `{"success": true, "data": ...}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationResponse<T> {
    Success(T),
    Failure(String),
}

impl<T> MutationResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, MutationResponse::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            MutationResponse::Success(data) => Some(data),
            MutationResponse::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            MutationResponse::Success(_) => None,
            MutationResponse::Failure(message) => Some(message),
        }
    }

    /// Converts into a `Result` for `?`-style callers.
    pub fn into_result(self) -> Result<T, String> {
        match self {
            MutationResponse::Success(data) => Ok(data),
            MutationResponse::Failure(message) => Err(message),
        }
    }
}

impl<T: Serialize> Serialize for MutationResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MutationResponse", 2)?;
        match self {
            MutationResponse::Success(data) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            MutationResponse::Failure(message) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", message)?;
            }
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loading_flags_are_independent() {
        let mut loading = LoadingState::default();
        loading.set(OperationKind::Create, true);
        loading.set(OperationKind::Delete, true);
        assert!(loading.creating && loading.deleting);
        assert!(!loading.fetching);

        loading.set(OperationKind::Create, false);
        assert!(!loading.creating);
        assert!(loading.deleting);
        assert!(loading.any());
    }

    #[test]
    fn test_error_state_clear() {
        let mut errors = ErrorState::default();
        errors.set(OperationKind::Update, Some("boom".to_string()));
        assert_eq!(errors.get(OperationKind::Update), Some("boom"));
        assert!(errors.has_any());

        errors.clear();
        assert!(!errors.has_any());
    }

    #[test]
    fn test_mutation_response_wire_shape() {
        let ok: MutationResponse<bool> = MutationResponse::Success(true);
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"success": true, "data": true})
        );

        let err: MutationResponse<bool> = MutationResponse::Failure("nope".to_string());
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"success": false, "error": "nope"})
        );
        assert_eq!(err.into_result(), Err("nope".to_string()));
    }

    #[test]
    fn test_error_message_fallback() {
        #[derive(Debug)]
        struct Silent;
        impl fmt::Display for Silent {
            fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Ok(())
            }
        }
        impl std::error::Error for Silent {}

        assert_eq!(error_message(&Silent), UNKNOWN_ERROR_MESSAGE);
    }
}
