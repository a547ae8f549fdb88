//! # Store Session
//!
//! Composition root for one application session: every entity store, the
//! tenant resolver and the notification worker.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        StoreSession Lifecycle                           │
//! │                                                                         │
//! │  open(config, tenant) / new / with_notifications / with_dispatcher     │
//! │       │  stores built in fixed order:                                   │
//! │       │  departments, divisions, employees, grades,                    │
//! │       │  positions, teams, notices, projects                           │
//! │       ▼                                                                 │
//! │  bootstrap()      no tenant yet → nothing fetched                      │
//! │       │           tenant       → every store fetched concurrently      │
//! │       ▼                                                                 │
//! │  refresh_all() / clear_all_errors() / status()                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  reset()          tenant changed or signed out: caches dropped         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  shutdown()       worker stopped, database closed                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hris_core::{
    Department, Division, Employee, EntityRow, Grade, Notice, Position, Project, Team,
};
use hris_db::{DataService, Database};

use crate::config::HrisConfig;
use crate::error::StoreResult;
use crate::notify::{
    BackendDirectory, BackendNotificationSink, DispatchSettings, DispatchSnapshot,
    NotificationDispatcher, NotificationQueue,
};
use crate::store::{EntityStore, StoreStatus};
use crate::tenant::TenantResolver;

pub type DepartmentStore = EntityStore<Department>;
pub type DivisionStore = EntityStore<Division>;
pub type EmployeeStore = EntityStore<Employee>;
pub type GradeStore = EntityStore<Grade>;
pub type PositionStore = EntityStore<Position>;
pub type TeamStore = EntityStore<Team>;
pub type NoticeStore = EntityStore<Notice>;
pub type ProjectStore = EntityStore<Project>;

// =============================================================================
// Session Status
// =============================================================================

/// Snapshot of every store plus the notification counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub company_id: Option<i64>,
    /// One entry per store, in construction order.
    pub stores: Vec<StoreStatus>,
    pub notifications: Option<DispatchSnapshot>,
}

impl SessionStatus {
    /// True when a tenant is set and every store loaded without error.
    pub fn is_ready(&self) -> bool {
        self.company_id.is_some()
            && self
                .stores
                .iter()
                .all(|store| store.initialized && store.errors.fetch_error.is_none())
    }
}

// =============================================================================
// Store Session
// =============================================================================

pub struct StoreSession {
    tenant: Arc<dyn TenantResolver>,
    departments: DepartmentStore,
    divisions: DivisionStore,
    employees: EmployeeStore,
    grades: GradeStore,
    positions: PositionStore,
    teams: TeamStore,
    notices: NoticeStore,
    projects: ProjectStore,
    notifications: Option<NotificationQueue>,
    worker: Option<JoinHandle<()>>,
    database: Option<Database>,
}

impl StoreSession {
    /// Session without notification side effects.
    pub fn new(backend: Arc<dyn DataService>, tenant: Arc<dyn TenantResolver>) -> Self {
        Self::build(backend, tenant, None)
    }

    /// Session whose notice and project stores feed `queue`.
    ///
    /// The caller owns the worker behind the queue.
    pub fn with_notifications(
        backend: Arc<dyn DataService>,
        tenant: Arc<dyn TenantResolver>,
        queue: NotificationQueue,
    ) -> Self {
        Self::build(backend, tenant, Some(queue))
    }

    /// Session that spawns and owns a dispatcher writing to the backend's
    /// notifications table.
    pub fn with_dispatcher(
        backend: Arc<dyn DataService>,
        tenant: Arc<dyn TenantResolver>,
        settings: DispatchSettings,
    ) -> Self {
        let (queue, worker) = NotificationDispatcher::spawn(
            Arc::new(BackendDirectory::new(backend.clone())),
            Arc::new(BackendNotificationSink::new(backend.clone())),
            settings,
        );
        let mut session = Self::build(backend, tenant, Some(queue));
        session.worker = Some(worker);
        session
    }

    /// Opens the configured database and builds a session over it.
    pub async fn open(config: &HrisConfig, tenant: Arc<dyn TenantResolver>) -> StoreResult<Self> {
        config.validate()?;
        let database = Database::new(config.db_config()?).await?;
        let migrations = database.migration_status().await?;
        info!(
            applied = migrations.applied,
            embedded = migrations.embedded,
            "Database ready"
        );
        let backend: Arc<dyn DataService> = Arc::new(database.data_service());

        let mut session = if config.notifications_enabled() {
            Self::with_dispatcher(backend, tenant, config.dispatch_settings())
        } else {
            info!("Notifications disabled by configuration");
            Self::new(backend, tenant)
        };
        session.database = Some(database);
        Ok(session)
    }

    fn build(
        backend: Arc<dyn DataService>,
        tenant: Arc<dyn TenantResolver>,
        notifications: Option<NotificationQueue>,
    ) -> Self {
        let queue = notifications.as_ref();
        StoreSession {
            departments: entity_store(&backend, &tenant, queue),
            divisions: entity_store(&backend, &tenant, queue),
            employees: entity_store(&backend, &tenant, queue),
            grades: entity_store(&backend, &tenant, queue),
            positions: entity_store(&backend, &tenant, queue),
            teams: entity_store(&backend, &tenant, queue),
            notices: entity_store(&backend, &tenant, queue),
            projects: entity_store(&backend, &tenant, queue),
            tenant,
            notifications,
            worker: None,
            database: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn departments(&self) -> &DepartmentStore {
        &self.departments
    }

    pub fn divisions(&self) -> &DivisionStore {
        &self.divisions
    }

    pub fn employees(&self) -> &EmployeeStore {
        &self.employees
    }

    pub fn grades(&self) -> &GradeStore {
        &self.grades
    }

    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub fn teams(&self) -> &TeamStore {
        &self.teams
    }

    pub fn notices(&self) -> &NoticeStore {
        &self.notices
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn tenant(&self) -> &Arc<dyn TenantResolver> {
        &self.tenant
    }

    pub fn notification_queue(&self) -> Option<&NotificationQueue> {
        self.notifications.as_ref()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Fills every cache once a tenant is available.
    ///
    /// Without a tenant nothing is fetched and no store records an error;
    /// call again after sign-in.
    pub async fn bootstrap(&self) -> SessionStatus {
        let Some(company_id) = self.tenant.tenant().ok().map(|t| t.get()) else {
            debug!("No tenant yet, bootstrap deferred");
            return self.status();
        };

        info!(company_id, "Bootstrapping store session");
        self.fetch_all(false).await;

        let status = self.status();
        if !status.is_ready() {
            warn!(company_id, "Some stores failed to load");
        }
        status
    }

    /// Re-fetches every store from the backend.
    pub async fn refresh_all(&self) -> SessionStatus {
        self.fetch_all(true).await;
        self.status()
    }

    async fn fetch_all(&self, force_refresh: bool) {
        tokio::join!(
            self.departments.fetch(force_refresh),
            self.divisions.fetch(force_refresh),
            self.employees.fetch(force_refresh),
            self.grades.fetch(force_refresh),
            self.positions.fetch(force_refresh),
            self.teams.fetch(force_refresh),
            self.notices.fetch(force_refresh),
            self.projects.fetch(force_refresh),
        );
    }

    pub fn clear_all_errors(&self) {
        self.departments.clear_errors();
        self.divisions.clear_errors();
        self.employees.clear_errors();
        self.grades.clear_errors();
        self.positions.clear_errors();
        self.teams.clear_errors();
        self.notices.clear_errors();
        self.projects.clear_errors();
    }

    /// Drops every cache (sign-out or tenant switch).
    pub fn reset(&self) {
        self.departments.reset();
        self.divisions.reset();
        self.employees.reset();
        self.grades.reset();
        self.positions.reset();
        self.teams.reset();
        self.notices.reset();
        self.projects.reset();
        info!("Store session reset");
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            company_id: self.tenant.tenant().ok().map(|t| t.get()),
            stores: vec![
                self.departments.status(),
                self.divisions.status(),
                self.employees.status(),
                self.grades.status(),
                self.positions.status(),
                self.teams.status(),
                self.notices.status(),
                self.projects.status(),
            ],
            notifications: self.notifications.as_ref().map(NotificationQueue::stats),
        }
    }

    /// Stops the owned worker and closes the owned database.
    pub async fn shutdown(mut self) {
        if let Some(queue) = &self.notifications {
            if let Some(worker) = self.worker.take() {
                if let Err(e) = queue.shutdown().await {
                    debug!(error = %e, "Dispatcher already stopped");
                }
                if let Err(e) = worker.await {
                    warn!(error = %e, "Notification worker ended abnormally");
                }
            }
        }

        if let Some(database) = self.database.take() {
            database.close().await;
        }
        info!("Store session shut down");
    }
}

/// Row types without notifications ignore the queue.
fn entity_store<R: EntityRow>(
    backend: &Arc<dyn DataService>,
    tenant: &Arc<dyn TenantResolver>,
    queue: Option<&NotificationQueue>,
) -> EntityStore<R> {
    match queue {
        Some(queue) => EntityStore::with_notifications(backend.clone(), tenant.clone(), queue.clone()),
        None => EntityStore::new(backend.clone(), tenant.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{FixedTenant, SessionTenant};
    use crate::testing::{wait_until, Op, ScriptedBackend};
    use hris_core::{EntityKind, RowId, RowPatch};
    use hris_db::{DbError, NOTIFICATIONS_TABLE};
    use serde_json::json;
    use std::time::Duration;

    fn seeded() -> Arc<ScriptedBackend> {
        let backend = Arc::new(ScriptedBackend::new());
        backend.seed("departments", vec![json!({"id": 1, "company_id": 7, "name": "Eng"})]);
        backend.seed(
            "employees",
            vec![json!({"id": "e1", "company_id": 7, "first_name": "Amara", "last_name": "O", "email": "a@x"})],
        );
        backend
    }

    #[tokio::test]
    async fn test_stores_are_built_in_fixed_order() {
        let session = StoreSession::new(seeded(), Arc::new(FixedTenant::new(7)));

        let kinds: Vec<EntityKind> = session.status().stores.iter().map(|s| s.kind).collect();

        assert_eq!(
            kinds,
            vec![
                EntityKind::Department,
                EntityKind::Division,
                EntityKind::Employee,
                EntityKind::Grade,
                EntityKind::Position,
                EntityKind::Team,
                EntityKind::Notice,
                EntityKind::Project,
            ]
        );
    }

    #[tokio::test]
    async fn test_bootstrap_waits_for_tenant() {
        let backend = seeded();
        let tenant = Arc::new(SessionTenant::default());
        let session = StoreSession::new(backend.clone(), tenant.clone());

        let status = session.bootstrap().await;
        assert_eq!(backend.total_calls(), 0);
        assert!(!status.is_ready());
        assert!(status.stores.iter().all(|s| s.errors.fetch_error.is_none()));

        tenant.set(7);
        let status = session.bootstrap().await;

        assert!(status.is_ready());
        assert_eq!(status.company_id, Some(7));
        assert_eq!(backend.calls(Op::Select), 8);
        assert_eq!(session.departments().len(), 1);
        assert_eq!(session.employees().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_all_forces_fetch() {
        let backend = seeded();
        let session = StoreSession::new(backend.clone(), Arc::new(FixedTenant::new(7)));
        session.bootstrap().await;

        session.bootstrap().await;
        assert_eq!(backend.calls(Op::Select), 8 + 6);

        session.refresh_all().await;
        assert_eq!(backend.calls(Op::Select), 8 + 6 + 8);
    }

    #[tokio::test]
    async fn test_failed_store_is_reported_and_cleared() {
        let backend = seeded();
        backend.fail_next(Op::Select, DbError::ConnectionFailed("refused".into()));
        let session = StoreSession::new(backend, Arc::new(FixedTenant::new(7)));

        let status = session.bootstrap().await;
        assert!(!status.is_ready());
        assert_eq!(
            status
                .stores
                .iter()
                .filter(|s| s.errors.fetch_error.is_some())
                .count(),
            1
        );

        session.clear_all_errors();
        assert!(session.status().stores.iter().all(|s| !s.errors.has_any()));
    }

    #[tokio::test]
    async fn test_reset_drops_every_cache() {
        let session = StoreSession::new(seeded(), Arc::new(FixedTenant::new(7)));
        session.bootstrap().await;

        session.reset();

        let status = session.status();
        assert!(status.stores.iter().all(|s| !s.initialized && s.rows == 0));
    }

    #[tokio::test]
    async fn test_only_notices_and_projects_notify() {
        let backend = seeded();
        let session = StoreSession::with_dispatcher(
            backend.clone(),
            Arc::new(FixedTenant::new(7)),
            DispatchSettings {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                ..DispatchSettings::default()
            },
        );

        let department = session
            .departments()
            .create(RowPatch::new().set("name", "Ops"))
            .await;
        let notice = session
            .notices()
            .create(RowPatch::new().set("title", "Town hall"))
            .await;
        assert!(department.is_success() && notice.is_success());

        let queue = session.notification_queue().unwrap().clone();
        wait_until(|| queue.stats().delivered == 1).await;
        assert_eq!(queue.stats().enqueued, 1);
        assert_eq!(backend.rows(NOTIFICATIONS_TABLE)[0]["recipient_id"], json!(["e1"]));

        session.shutdown().await;
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_open_over_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HrisConfig::default();
        config.database.path = Some(dir.path().join("hris.db"));
        config.notifications.enabled = false;

        let session = StoreSession::open(&config, Arc::new(FixedTenant::new(3)))
            .await
            .unwrap();
        assert!(session.notification_queue().is_none());

        let created = session
            .teams()
            .create(RowPatch::new().set("name", "Platform"))
            .await;
        let team = created.data().cloned().unwrap();
        assert_eq!(team.company_id, 3);

        let status = session.refresh_all().await;
        assert!(status.is_ready());
        assert_eq!(session.teams().get_by_id(&RowId::Int(1)), Some(team));

        session.shutdown().await;
    }
}
