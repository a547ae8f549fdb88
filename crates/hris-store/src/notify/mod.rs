//! # Notification Side Effects
//!
//! Best-effort notifications after a notice or project was created or
//! updated.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Notification Side-Effect Path                        │
//! │                                                                         │
//! │  EntityStore::create / update   (row already committed)                │
//! │       │                                                                 │
//! │       │  row.notification(event) → NotificationDraft                   │
//! │       ▼                                                                 │
//! │  NotificationQueue::enqueue(job)   ← try_send, never blocks the store  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  NotificationDispatcher (background task)                              │
//! │       │                                                                 │
//! │       ├── RecipientDirectory   audience → employee ids                 │
//! │       └── NotificationSink     payload → notifications table           │
//! │            (exponential backoff, up to max_attempts)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failure anywhere on this path is logged. It never changes the
//! `MutationResponse` of the mutation that produced the job.

pub mod outbox;

use std::sync::Arc;

use async_trait::async_trait;
use hris_core::{
    Audience, EntityKind, EntityRow, Employee, NotificationDraft, NotificationPayload, RowId,
    RowPatch,
};
use hris_db::{DataService, SelectQuery, NOTIFICATIONS_TABLE};
use tracing::{debug, warn};

use crate::error::StoreResult;

pub use outbox::{
    DispatchSettings, DispatchSnapshot, DispatchStats, NotificationDispatcher, NotificationQueue,
};

// =============================================================================
// Job
// =============================================================================

/// A notification waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationJob {
    /// Entity whose change produced the job.
    pub source: EntityKind,
    /// Row whose change produced the job.
    pub row_id: RowId,
    pub company_id: i64,
    pub draft: NotificationDraft,
}

// =============================================================================
// Collaborators
// =============================================================================

/// The external `createNotification` collaborator.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create_notification(&self, payload: &NotificationPayload) -> StoreResult<()>;
}

/// Employee lookup used to expand an [`Audience`].
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Active employees of one department.
    async fn department_members(
        &self,
        company_id: i64,
        department_id: &RowId,
    ) -> StoreResult<Vec<String>>;

    /// Active employees of the whole company.
    async fn company_members(&self, company_id: i64) -> StoreResult<Vec<String>>;
}

/// Expands an audience into recipient ids (not yet deduplicated).
pub async fn resolve_recipients(
    directory: &dyn RecipientDirectory,
    company_id: i64,
    audience: &Audience,
) -> StoreResult<Vec<String>> {
    match audience {
        Audience::Department(department_id) => {
            directory.department_members(company_id, department_id).await
        }
        Audience::Company => directory.company_members(company_id).await,
        Audience::People(ids) => Ok(ids.clone()),
    }
}

// =============================================================================
// Backend-backed implementations
// =============================================================================

/// Looks recipients up in the `employees` table.
#[derive(Clone)]
pub struct BackendDirectory {
    backend: Arc<dyn DataService>,
}

impl BackendDirectory {
    pub fn new(backend: Arc<dyn DataService>) -> Self {
        BackendDirectory { backend }
    }

    async fn active_employees(&self, query: SelectQuery) -> StoreResult<Vec<String>> {
        let rows = self.backend.select(&query).await?;

        let mut ids = Vec::with_capacity(rows.len());
        for value in rows {
            match Employee::decode(value) {
                Ok(employee) if employee.is_active => ids.push(employee.recipient_id()),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping undecodable employee row"),
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl RecipientDirectory for BackendDirectory {
    async fn department_members(
        &self,
        company_id: i64,
        department_id: &RowId,
    ) -> StoreResult<Vec<String>> {
        let query = SelectQuery::from(EntityKind::Employee.table())
            .eq("company_id", company_id)
            .eq("department_id", department_id.to_json())
            .order(EntityKind::Employee.order_key());
        self.active_employees(query).await
    }

    async fn company_members(&self, company_id: i64) -> StoreResult<Vec<String>> {
        let query = SelectQuery::from(EntityKind::Employee.table())
            .eq("company_id", company_id)
            .order(EntityKind::Employee.order_key());
        self.active_employees(query).await
    }
}

/// Writes notifications into the `notifications` table.
#[derive(Clone)]
pub struct BackendNotificationSink {
    backend: Arc<dyn DataService>,
}

impl BackendNotificationSink {
    pub fn new(backend: Arc<dyn DataService>) -> Self {
        BackendNotificationSink { backend }
    }
}

#[async_trait]
impl NotificationSink for BackendNotificationSink {
    async fn create_notification(&self, payload: &NotificationPayload) -> StoreResult<()> {
        let row = RowPatch::from_row(payload)?;
        let stored = self.backend.insert(NOTIFICATIONS_TABLE, &row).await?;
        debug!(
            id = %stored.get("id").cloned().unwrap_or_default(),
            recipients = payload.recipient_id.len(),
            "Notification stored"
        );
        Ok(())
    }
}
