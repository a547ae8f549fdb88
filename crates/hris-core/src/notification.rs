//! # Notification Types
//!
//! Pure description of the notifications a row change produces.
//!
//! ## From Draft to Payload
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Notification Lifecycle                               │
//! │                                                                         │
//! │  Notice / Project row (after successful create or update)              │
//! │       │                                                                 │
//! │       │  row.notification(ChangeEvent::Created)                        │
//! │       ▼                                                                 │
//! │  NotificationDraft { title, message, priority, audience, ... }         │
//! │       │                                                                 │
//! │       │  audience resolved by a RecipientDirectory (hris-store)        │
//! │       ▼                                                                 │
//! │  NotificationPayload { ..., recipient_id: ["uuid", ...], company_id }  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  NotificationSink::create_notification(payload)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::types::RowId;

/// Which change produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Created,
    Updated,
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Notification category (the `type_id` of the payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Notice,
    Project,
}

/// Who should receive a notification, before lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every active employee of a department.
    Department(RowId),
    /// Every active employee of the company.
    Company,
    /// Explicit employee ids.
    People(Vec<String>),
}

/// A notification whose recipients are not resolved yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub kind: NotificationKind,
    pub audience: Audience,
    pub action_url: Option<String>,
    pub department_id: Option<RowId>,
}

impl NotificationDraft {
    /// Attaches tenant and resolved recipients.
    ///
    /// Recipients are deduplicated, keeping first-seen order; empty ids are
    /// dropped.
    pub fn into_payload(self, company_id: i64, recipients: Vec<String>) -> NotificationPayload {
        NotificationPayload {
            title: self.title,
            message: self.message,
            priority: self.priority,
            type_id: self.kind,
            recipient_id: dedupe_recipients(recipients),
            action_url: self.action_url,
            company_id,
            department_id: self.department_id,
        }
    }
}

/// What the notification service receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub type_id: NotificationKind,
    pub recipient_id: Vec<String>,
    pub action_url: Option<String>,
    pub company_id: i64,
    pub department_id: Option<RowId>,
}

/// Removes duplicate and empty recipient ids, preserving order.
pub fn dedupe_recipients(recipients: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    recipients
        .into_iter()
        .filter(|id| !id.trim().is_empty())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
