//! # Domain Types
//!
//! Row types and identifiers used throughout PeopleOps HRIS.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     RowId       │   │    TenantId     │   │   EntityKind    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Int(i64)       │   │  company_id > 0 │   │  table          │       │
//! │  │  Text(String)   │   │                 │   │  order key      │       │
//! │  └─────────────────┘   └─────────────────┘   │  id strategy    │       │
//! │                                              └─────────────────┘       │
//! │                                                                         │
//! │  EntityRow implementors (closed set, tagged by EntityKind):            │
//! │  Department · Division · Employee · Grade · Position · Team ·          │
//! │  Notice · Project                                                       │
//! │                                                                         │
//! │  RowPatch: shallow JSON object (Partial<Row>) for create and update    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Boundary Validation
//! The backend speaks JSON objects. Nothing enters a store cache until it has
//! been decoded into one of the typed rows below (see [`EntityRow::decode`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::notification::{Audience, ChangeEvent, NotificationDraft, NotificationKind, NotificationPriority};

/// Keys that identify a row and therefore can never appear in an update patch.
pub const IDENTITY_KEYS: [&str; 2] = ["id", "company_id"];

// =============================================================================
// Row Identifier
// =============================================================================

/// Identifier of a row.
///
/// Most tables use backend-assigned serial integers; employees use UUID
/// strings because their id doubles as the notification recipient id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export)]
pub enum RowId {
    /// Serial integer id.
    Int(i64),
    /// Text id (UUID v4).
    Text(String),
}

impl RowId {
    /// Returns the id as a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            RowId::Int(id) => Value::from(*id),
            RowId::Text(id) => Value::from(id.as_str()),
        }
    }

    /// Parses a JSON value into a RowId.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RowId::Int),
            Value::String(s) => Some(RowId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(id) => write!(f, "{}", id),
            RowId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        RowId::Int(id)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId::Text(id.to_string())
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        RowId::Text(id)
    }
}

// =============================================================================
// Tenant
// =============================================================================

/// The company (tenant) every row is scoped to.
///
/// ## Invariant
/// Always strictly positive. Construct through [`TenantId::try_from_raw`]
/// or [`TenantId::new`], never from an unchecked integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

impl TenantId {
    /// Creates a tenant id, rejecting zero and negative values.
    pub fn new(company_id: i64) -> CoreResult<Self> {
        if company_id <= 0 {
            return Err(CoreError::MissingTenant);
        }
        Ok(TenantId(company_id))
    }

    /// Validates whatever the tenant resolver handed us.
    ///
    /// `None` (nobody signed in) and non-positive ids are both a
    /// precondition failure.
    pub fn try_from_raw(raw: Option<i64>) -> CoreResult<Self> {
        match raw {
            Some(id) => TenantId::new(id),
            None => Err(CoreError::MissingTenant),
        }
    }

    /// Returns the raw company id.
    #[inline]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Entity Kind
// =============================================================================

/// How the backend assigns ids for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Auto-incrementing integer.
    Serial,
    /// UUID v4 string (caller may supply its own).
    Uuid,
}

/// The closed set of entities that get a store.
///
/// ## Table Registry
/// ```text
/// ┌──────────────┬──────────────┬───────────────┬────────┐
/// │ Kind         │ table        │ order key     │ id     │
/// ├──────────────┼──────────────┼───────────────┼────────┤
/// │ Department   │ departments  │ name          │ serial │
/// │ Division     │ divisions    │ name          │ serial │
/// │ Employee     │ employees    │ first_name    │ uuid   │
/// │ Grade        │ grades       │ name          │ serial │
/// │ Position     │ positions    │ name          │ serial │
/// │ Team         │ teams        │ name          │ serial │
/// │ Notice       │ notices      │ title         │ serial │
/// │ Project      │ projects     │ project_title │ serial │
/// └──────────────┴──────────────┴───────────────┴────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Department,
    Division,
    Employee,
    Grade,
    Position,
    Team,
    Notice,
    Project,
}

impl EntityKind {
    /// Every kind, in session construction order.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Department,
        EntityKind::Division,
        EntityKind::Employee,
        EntityKind::Grade,
        EntityKind::Position,
        EntityKind::Team,
        EntityKind::Notice,
        EntityKind::Project,
    ];

    /// Backend table holding this entity.
    pub const fn table(&self) -> &'static str {
        match self {
            EntityKind::Department => "departments",
            EntityKind::Division => "divisions",
            EntityKind::Employee => "employees",
            EntityKind::Grade => "grades",
            EntityKind::Position => "positions",
            EntityKind::Team => "teams",
            EntityKind::Notice => "notices",
            EntityKind::Project => "projects",
        }
    }

    /// Stable secondary key used to order fetched rows.
    pub const fn order_key(&self) -> &'static str {
        match self {
            EntityKind::Employee => "first_name",
            EntityKind::Notice => "title",
            EntityKind::Project => "project_title",
            _ => "name",
        }
    }

    /// Id assignment strategy of the backing table.
    pub const fn id_strategy(&self) -> IdStrategy {
        match self {
            EntityKind::Employee => IdStrategy::Uuid,
            _ => IdStrategy::Serial,
        }
    }

    /// Looks a kind up by its table name.
    pub fn from_table(table: &str) -> Option<Self> {
        EntityKind::ALL.into_iter().find(|kind| kind.table() == table)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Department => "department",
            EntityKind::Division => "division",
            EntityKind::Employee => "employee",
            EntityKind::Grade => "grade",
            EntityKind::Position => "position",
            EntityKind::Team => "team",
            EntityKind::Notice => "notice",
            EntityKind::Project => "project",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Row Patch
// =============================================================================

/// A shallow JSON object: the `Partial<Row>` of create payloads and update
/// patches.
///
/// ## Example
/// ```rust
/// use hris_core::RowPatch;
///
/// let patch = RowPatch::new().set("name", "Engineering");
/// assert_eq!(patch.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowPatch(Map<String, Value>);

impl RowPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        RowPatch(Map::new())
    }

    /// Builder-style insert.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts or overwrites a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Removes a key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the patch, returning the JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Converts any JSON value into a patch. Only objects are accepted.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(RowPatch(map)),
            other => Err(ValidationError::InvalidFormat {
                field: "patch".to_string(),
                reason: format!("expected a JSON object, got {}", json_type_name(&other)),
            }),
        }
    }

    /// Serializes a full row into a patch (every column present).
    pub fn from_row<R: Serialize>(row: &R) -> Result<Self, ValidationError> {
        let value = serde_json::to_value(row).map_err(|e| ValidationError::InvalidFormat {
            field: "row".to_string(),
            reason: e.to_string(),
        })?;
        RowPatch::from_value(value)
    }

    /// Rejects patches that try to rewrite a row's identity.
    pub fn ensure_identity_untouched(&self) -> Result<(), ValidationError> {
        for key in IDENTITY_KEYS {
            if self.0.contains_key(key) {
                return Err(ValidationError::Immutable {
                    field: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl From<Map<String, Value>> for RowPatch {
    fn from(map: Map<String, Value>) -> Self {
        RowPatch(map)
    }
}

impl From<RowPatch> for Value {
    fn from(patch: RowPatch) -> Self {
        Value::Object(patch.0)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Entity Row Trait
// =============================================================================

/// A tenant-scoped record that can live in a store cache.
///
/// ## Contract
/// - `id()` is unique within the table and never changes
/// - `company_id()` is the tenant the row belongs to
/// - `notification()` returns the side effect a change to this row should
///   produce, if any (only notices and projects produce one)
pub trait EntityRow:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Which entity this row type is.
    const KIND: EntityKind;

    /// Row identity.
    fn id(&self) -> &RowId;

    /// Tenant key.
    fn company_id(&self) -> i64;

    /// Notification to send after this row was created or updated.
    fn notification(&self, _event: ChangeEvent) -> Option<NotificationDraft> {
        None
    }

    /// Decodes a backend JSON row into this type.
    fn decode(value: Value) -> CoreResult<Self> {
        serde_json::from_value(value).map_err(|e| CoreError::InvalidRow {
            kind: Self::KIND,
            reason: e.to_string(),
        })
    }
}

/// Implements `EntityRow` for a row struct with `id` and `company_id` fields.
macro_rules! entity_row {
    ($ty:ty, $kind:expr) => {
        impl EntityRow for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &RowId {
                &self.id
            }

            fn company_id(&self) -> i64 {
                self.company_id
            }
        }
    };
}

// =============================================================================
// Organisation Structure
// =============================================================================

/// A division groups several departments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Division {
    pub id: RowId,
    pub company_id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Employee heading the division.
    pub head_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A department, optionally inside a division.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Department {
    pub id: RowId,
    pub company_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub division_id: Option<RowId>,
    /// Employee heading the department.
    pub head_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A pay grade (payroll configuration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Grade {
    pub id: RowId,
    pub company_id: i64,
    pub name: String,
    /// Basic monthly salary in the smallest currency unit.
    pub basic_salary: Option<i64>,
    pub description: Option<String>,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A job position (designation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Position {
    pub id: RowId,
    pub company_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub department_id: Option<RowId>,
    pub grade_id: Option<RowId>,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A cross-functional team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Team {
    pub id: RowId,
    pub company_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub team_lead_id: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// An employee profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Employee {
    /// UUID v4 (shared with the auth profile).
    pub id: RowId,
    pub company_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department_id: Option<RowId>,
    pub position_id: Option<RowId>,
    pub grade_id: Option<RowId>,
    pub supervisor_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Employee {
    /// Id as used in notification recipient lists.
    pub fn recipient_id(&self) -> String {
        self.id.to_string()
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Notices
// =============================================================================

/// How urgent a notice is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NoticeUrgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl From<NoticeUrgency> for NotificationPriority {
    fn from(urgency: NoticeUrgency) -> Self {
        match urgency {
            NoticeUrgency::Low => NotificationPriority::Low,
            NoticeUrgency::Normal => NotificationPriority::Normal,
            NoticeUrgency::High => NotificationPriority::High,
            NoticeUrgency::Critical => NotificationPriority::Urgent,
        }
    }
}

/// A company or department notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Notice {
    pub id: RowId,
    pub company_id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub urgency: NoticeUrgency,
    /// Department the notice is addressed to; `None` means company-wide.
    pub department_id: Option<RowId>,
    pub created_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EntityRow for Notice {
    const KIND: EntityKind = EntityKind::Notice;

    fn id(&self) -> &RowId {
        &self.id
    }

    fn company_id(&self) -> i64 {
        self.company_id
    }

    fn notification(&self, event: ChangeEvent) -> Option<NotificationDraft> {
        let title = match event {
            ChangeEvent::Created => format!("New notice: {}", self.title),
            ChangeEvent::Updated => format!("Notice updated: {}", self.title),
        };
        let audience = match &self.department_id {
            Some(department_id) => Audience::Department(department_id.clone()),
            None => Audience::Company,
        };

        Some(NotificationDraft {
            title,
            message: self
                .description
                .clone()
                .unwrap_or_else(|| self.title.clone()),
            priority: self.urgency.into(),
            kind: NotificationKind::Notice,
            audience,
            action_url: Some(format!("/notice/{}", self.id)),
            department_id: self.department_id.clone(),
        })
    }
}

// =============================================================================
// Projects
// =============================================================================

/// Lifecycle of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Ongoing,
    /// Assignees handed the work in; waiting on the supervisor.
    Submitted,
    Completed,
    Archived,
}

/// A project with assignees and a supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Project {
    pub id: RowId,
    pub company_id: i64,
    pub project_title: String,
    pub description: Option<String>,
    pub department_id: Option<RowId>,
    /// Employee ids working on the project.
    #[serde(default)]
    pub assignees: Vec<String>,
    pub supervisor_id: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EntityRow for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> &RowId {
        &self.id
    }

    fn company_id(&self) -> i64 {
        self.company_id
    }

    fn notification(&self, event: ChangeEvent) -> Option<NotificationDraft> {
        let (title, priority, audience) = match (event, self.status) {
            // Submissions only concern the supervisor.
            (ChangeEvent::Updated, ProjectStatus::Submitted) => {
                let supervisor = self.supervisor_id.clone()?;
                (
                    format!("Project submitted for review: {}", self.project_title),
                    NotificationPriority::High,
                    Audience::People(vec![supervisor]),
                )
            }
            (ChangeEvent::Created, _) => (
                format!("New project assigned: {}", self.project_title),
                NotificationPriority::Normal,
                Audience::People(self.stakeholders()),
            ),
            (ChangeEvent::Updated, _) => (
                format!("Project updated: {}", self.project_title),
                NotificationPriority::Normal,
                Audience::People(self.stakeholders()),
            ),
        };

        Some(NotificationDraft {
            title,
            message: self
                .description
                .clone()
                .unwrap_or_else(|| self.project_title.clone()),
            priority,
            kind: NotificationKind::Project,
            audience,
            action_url: Some(format!("/project/{}", self.id)),
            department_id: self.department_id.clone(),
        })
    }
}

impl Project {
    /// Assignees followed by the supervisor.
    pub fn stakeholders(&self) -> Vec<String> {
        let mut people = self.assignees.clone();
        if let Some(supervisor) = &self.supervisor_id {
            people.push(supervisor.clone());
        }
        people
    }
}

entity_row!(Division, EntityKind::Division);
entity_row!(Department, EntityKind::Department);
entity_row!(Grade, EntityKind::Grade);
entity_row!(Position, EntityKind::Position);
entity_row!(Team, EntityKind::Team);
entity_row!(Employee, EntityKind::Employee);

// =============================================================================
// Any Row
// =============================================================================

/// Tagged union of every row type.
///
/// Used by the backend to validate a row's shape before committing it.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyRow {
    Department(Department),
    Division(Division),
    Employee(Employee),
    Grade(Grade),
    Position(Position),
    Team(Team),
    Notice(Notice),
    Project(Project),
}

impl AnyRow {
    /// Decodes a JSON row of the given kind into its typed variant.
    pub fn decode(kind: EntityKind, value: Value) -> CoreResult<Self> {
        Ok(match kind {
            EntityKind::Department => AnyRow::Department(Department::decode(value)?),
            EntityKind::Division => AnyRow::Division(Division::decode(value)?),
            EntityKind::Employee => AnyRow::Employee(Employee::decode(value)?),
            EntityKind::Grade => AnyRow::Grade(Grade::decode(value)?),
            EntityKind::Position => AnyRow::Position(Position::decode(value)?),
            EntityKind::Team => AnyRow::Team(Team::decode(value)?),
            EntityKind::Notice => AnyRow::Notice(Notice::decode(value)?),
            EntityKind::Project => AnyRow::Project(Project::decode(value)?),
        })
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            AnyRow::Department(_) => EntityKind::Department,
            AnyRow::Division(_) => EntityKind::Division,
            AnyRow::Employee(_) => EntityKind::Employee,
            AnyRow::Grade(_) => EntityKind::Grade,
            AnyRow::Position(_) => EntityKind::Position,
            AnyRow::Team(_) => EntityKind::Team,
            AnyRow::Notice(_) => EntityKind::Notice,
            AnyRow::Project(_) => EntityKind::Project,
        }
    }

    pub fn id(&self) -> &RowId {
        match self {
            AnyRow::Department(row) => row.id(),
            AnyRow::Division(row) => row.id(),
            AnyRow::Employee(row) => row.id(),
            AnyRow::Grade(row) => row.id(),
            AnyRow::Position(row) => row.id(),
            AnyRow::Team(row) => row.id(),
            AnyRow::Notice(row) => row.id(),
            AnyRow::Project(row) => row.id(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
