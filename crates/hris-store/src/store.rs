//! # Entity Store
//!
//! Tenant-scoped cache of one entity's rows with optimistic mutations.
//!
//! ## Operation Timeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     EntityStore<R> operations                           │
//! │                                                                         │
//! │  fetch(force)                                                          │
//! │    !force && initialized && non-empty ──► cached rows, no backend call │
//! │    no tenant ──► fetch_error, []                                       │
//! │    select(table).eq(company_id).order(order key)                       │
//! │      ok  → decode every row, check tenant, replace cache               │
//! │      err → fetch_error, [] (cache untouched)                           │
//! │                                                                         │
//! │  create(data)          no optimistic append                            │
//! │    insert(data + company_id) → append server row → notify             │
//! │                                                                         │
//! │  update(id, patch)     ticket #n for row id                            │
//! │    optimistic merge → update(...)                                      │
//! │      ok  → settle on server row unless newer #m in flight → notify     │
//! │      err → back to last confirmed state unless newer #m in flight      │
//! │                                                                         │
//! │  delete(id)            ticket #n for row id                            │
//! │    optimistic removal → delete(...)                                    │
//! │      err → back to last confirmed state unless newer #m in flight      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Reporting
//! Nothing here returns `Err`. `fetch` always resolves to a list (possibly
//! empty) and mutations always resolve to a [`MutationResponse`]. The
//! message of every failure is also stored in the matching [`ErrorState`]
//! field, where it stays until the same operation starts again or
//! [`EntityStore::clear_errors`] is called.
//!
//! ## Concurrency
//! The cache sits behind a `std::sync::Mutex` that is never held across an
//! `.await`. Loading flags count in-flight calls, so two concurrent updates
//! keep `updating` true until both finish. Dropping an operation's future
//! still clears its loading flag; an update or delete dropped mid-flight
//! leaves its optimistic change in place because the backend outcome is
//! unknown.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hris_core::validation::{validate_create_payload, validate_required_text, validate_update_patch};
use hris_core::{
    engine, error_message, ChangeEvent, EntityKind, EntityRow, ErrorState, LoadingState,
    MutationResponse, OperationKind, RowId, RowPatch, TenantId,
};
use hris_db::{DataService, RowFilter, SelectQuery};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::notify::{NotificationJob, NotificationQueue};
use crate::tenant::TenantResolver;

// =============================================================================
// Store State
// =============================================================================

/// Bookkeeping for a row with mutations in flight.
struct PendingRow<R> {
    /// Tickets of mutations for the row that have not resolved yet.
    unresolved: BTreeSet<u64>,
    /// Cache as it was before the first of these mutations.
    base: Vec<R>,
    /// Newest backend-confirmed state of the row and the ticket that
    /// confirmed it (`None` row after a confirmed delete).
    confirmed: Option<(u64, Option<R>)>,
}

impl<R: EntityRow> PendingRow<R> {
    /// Cache the row should show once nothing newer is in flight.
    fn settled(&self, id: &RowId) -> Vec<R> {
        match &self.confirmed {
            None => self.base.clone(),
            Some((_, Some(row))) => engine::replace(&self.base, row.clone()),
            Some((_, None)) => engine::remove(&self.base, id),
        }
    }
}

struct StoreState<R> {
    rows: Vec<R>,
    initialized: bool,
    loading: LoadingState,
    in_flight: [usize; 4],
    errors: ErrorState,
    pending: HashMap<RowId, PendingRow<R>>,
    next_ticket: u64,
    /// Bumped by `reset`; results of older operations are discarded.
    epoch: u64,
}

impl<R: EntityRow> StoreState<R> {
    fn new() -> Self {
        StoreState {
            rows: Vec::new(),
            initialized: false,
            loading: LoadingState::default(),
            in_flight: [0; 4],
            errors: ErrorState::default(),
            pending: HashMap::new(),
            next_ticket: 0,
            epoch: 0,
        }
    }

    fn open_ticket(&mut self, id: &RowId) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;

        let rows = &self.rows;
        self.pending
            .entry(id.clone())
            .or_insert_with(|| PendingRow {
                unresolved: BTreeSet::new(),
                base: rows.clone(),
                confirmed: None,
            })
            .unresolved
            .insert(ticket);
        ticket
    }

    /// Resolves `ticket` for the row. `outcome` carries the state the
    /// backend confirmed, or `None` when the mutation failed.
    ///
    /// Returns true when the cache was reconciled with the newest confirmed
    /// state, false while a newer mutation of the row is still in flight.
    fn resolve(&mut self, id: &RowId, ticket: u64, outcome: Option<Option<R>>) -> bool {
        let Some(pending) = self.pending.get_mut(id) else {
            return false;
        };
        pending.unresolved.remove(&ticket);

        if let Some(row) = outcome {
            let superseded = matches!(pending.confirmed, Some((seen, _)) if seen > ticket);
            if !superseded {
                pending.confirmed = Some((ticket, row));
            }
        }
        if pending.unresolved.range(ticket + 1..).next().is_some() {
            return false;
        }

        let target = pending.settled(id);
        self.rows = engine::restore(&self.rows, &target, id);
        true
    }

    /// True when a newer mutation of the row has already been confirmed.
    fn confirmed_after(&self, id: &RowId, ticket: u64) -> bool {
        self.pending
            .get(id)
            .is_some_and(|pending| matches!(pending.confirmed, Some((seen, _)) if seen > ticket))
    }
}

impl<R> StoreState<R> {
    fn start(&mut self, kind: OperationKind) {
        self.in_flight[slot(kind)] += 1;
        self.loading.set(kind, true);
        self.errors.set(kind, None);
    }

    fn finish(&mut self, kind: OperationKind) {
        let count = &mut self.in_flight[slot(kind)];
        *count = count.saturating_sub(1);
        let still_running = *count > 0;
        self.loading.set(kind, still_running);
    }

    fn close_ticket(&mut self, id: &RowId, ticket: u64) {
        if let Some(pending) = self.pending.get_mut(id) {
            pending.unresolved.remove(&ticket);
            if pending.unresolved.is_empty() {
                self.pending.remove(id);
            }
        }
    }
}

fn slot(kind: OperationKind) -> usize {
    match kind {
        OperationKind::Fetch => 0,
        OperationKind::Create => 1,
        OperationKind::Update => 2,
        OperationKind::Delete => 3,
    }
}

fn lock<R>(state: &Mutex<StoreState<R>>) -> MutexGuard<'_, StoreState<R>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Scoped Finalizers
// =============================================================================

/// Clears a loading flag when the operation ends, however it ends.
struct InFlight<'a, R> {
    state: &'a Mutex<StoreState<R>>,
    kind: OperationKind,
}

impl<R> Drop for InFlight<'_, R> {
    fn drop(&mut self) {
        lock(self.state).finish(self.kind);
    }
}

/// One update or delete of one row.
struct RowTicket<'a, R> {
    state: &'a Mutex<StoreState<R>>,
    id: RowId,
    ticket: u64,
    epoch: u64,
}

impl<R> Drop for RowTicket<'_, R> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if state.epoch == self.epoch {
            state.close_ticket(&self.id, self.ticket);
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Point-in-time view of one store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub kind: EntityKind,
    pub initialized: bool,
    pub rows: usize,
    pub loading: LoadingState,
    pub errors: ErrorState,
}

// =============================================================================
// Entity Store
// =============================================================================

struct StoreInner<R> {
    backend: Arc<dyn DataService>,
    tenant: Arc<dyn TenantResolver>,
    notifications: Option<NotificationQueue>,
    state: Mutex<StoreState<R>>,
}

/// Cache and mutation entry point for one entity.
///
/// Cheap to clone; clones share the cache.
///
/// ## Example
/// ```rust,ignore
/// let departments: EntityStore<Department> = EntityStore::new(backend, tenant);
///
/// let rows = departments.fetch(false).await;
/// if let Some(err) = departments.errors().fetch_error {
///     eprintln!("fetch failed: {err}");
/// }
///
/// let response = departments
///     .update(&RowId::Int(1), RowPatch::new().set("name", "Engineering"))
///     .await;
/// if !response.is_success() {
///     // cache already rolled back
/// }
/// ```
pub struct EntityStore<R> {
    inner: Arc<StoreInner<R>>,
}

impl<R> Clone for EntityStore<R> {
    fn clone(&self) -> Self {
        EntityStore {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: EntityRow> EntityStore<R> {
    /// Creates an empty store without notification side effects.
    pub fn new(backend: Arc<dyn DataService>, tenant: Arc<dyn TenantResolver>) -> Self {
        Self::build(backend, tenant, None)
    }

    /// Creates an empty store that queues notifications after successful
    /// creates and updates (for row types that produce any).
    pub fn with_notifications(
        backend: Arc<dyn DataService>,
        tenant: Arc<dyn TenantResolver>,
        queue: NotificationQueue,
    ) -> Self {
        Self::build(backend, tenant, Some(queue))
    }

    fn build(
        backend: Arc<dyn DataService>,
        tenant: Arc<dyn TenantResolver>,
        notifications: Option<NotificationQueue>,
    ) -> Self {
        EntityStore {
            inner: Arc::new(StoreInner {
                backend,
                tenant,
                notifications,
                state: Mutex::new(StoreState::new()),
            }),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Loads the tenant's rows, or serves the cache.
    ///
    /// The cache is served without a backend call when `force_refresh` is
    /// false, the store is initialized and the cache is non-empty. On any
    /// failure the result is empty and `fetch_error` is set.
    pub async fn fetch(&self, force_refresh: bool) -> Vec<R> {
        {
            let state = self.lock();
            if !force_refresh && state.initialized && !state.rows.is_empty() {
                debug!(kind = %R::KIND, rows = state.rows.len(), "Serving cached rows");
                return state.rows.clone();
            }
        }

        let tenant = match self.inner.tenant.tenant() {
            Ok(tenant) => tenant,
            Err(e) => {
                self.record(OperationKind::Fetch, &e);
                return Vec::new();
            }
        };

        let _in_flight = self.begin(OperationKind::Fetch);
        let epoch = self.lock().epoch;

        match self.load(tenant).await {
            Ok(rows) => {
                let mut state = self.lock();
                if state.epoch == epoch {
                    state.rows = rows.clone();
                    state.initialized = true;
                }
                info!(kind = %R::KIND, company_id = tenant.get(), rows = rows.len(), "Rows loaded");
                rows
            }
            Err(e) => {
                self.record(OperationKind::Fetch, &e);
                Vec::new()
            }
        }
    }

    /// Same as `fetch(true)`.
    pub async fn refresh(&self) -> Vec<R> {
        self.fetch(true).await
    }

    async fn load(&self, tenant: TenantId) -> StoreResult<Vec<R>> {
        let query = SelectQuery::from(R::KIND.table())
            .eq("company_id", tenant.get())
            .order(R::KIND.order_key());
        debug!(kind = %R::KIND, company_id = tenant.get(), "Selecting rows");

        self.inner
            .backend
            .select(&query)
            .await?
            .into_iter()
            .map(|value| self.accept(tenant, value))
            .collect()
    }

    /// Cached row with `id`. Never calls the backend.
    pub fn get_by_id(&self, id: &RowId) -> Option<R> {
        engine::find(&self.lock().rows, id).cloned()
    }

    pub fn rows(&self) -> Vec<R> {
        self.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn loading(&self) -> LoadingState {
        self.lock().loading
    }

    pub fn errors(&self) -> ErrorState {
        self.lock().errors.clone()
    }

    pub fn kind(&self) -> EntityKind {
        R::KIND
    }

    pub fn status(&self) -> StoreStatus {
        let state = self.lock();
        StoreStatus {
            kind: R::KIND,
            initialized: state.initialized,
            rows: state.rows.len(),
            loading: state.loading,
            errors: state.errors.clone(),
        }
    }

    /// Resets all four error fields.
    pub fn clear_errors(&self) {
        self.lock().errors.clear();
    }

    /// Drops the cache (tenant change, end of session).
    ///
    /// Operations still in flight finish normally but no longer write to
    /// the cache.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.rows.clear();
        state.initialized = false;
        state.errors.clear();
        state.pending.clear();
        state.epoch += 1;
        debug!(kind = %R::KIND, "Store reset");
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Inserts a row for the current tenant.
    ///
    /// The cache only changes once the backend returns the stored row.
    pub async fn create(&self, data: RowPatch) -> MutationResponse<R> {
        let tenant = match self.inner.tenant.tenant() {
            Ok(tenant) => tenant,
            Err(e) => return self.fail(OperationKind::Create, e),
        };
        if let Err(e) = validate_create_payload(&data)
            .and_then(|_| validate_required_text(&data, R::KIND.order_key()))
        {
            return self.fail(OperationKind::Create, e.into());
        }

        let _in_flight = self.begin(OperationKind::Create);
        let epoch = self.lock().epoch;

        let payload = data.set("company_id", tenant.get());
        let result = match self.inner.backend.insert(R::KIND.table(), &payload).await {
            Ok(value) => self.accept(tenant, value),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(row) => {
                {
                    let mut state = self.lock();
                    if state.epoch == epoch {
                        state.rows = engine::add(&state.rows, row.clone());
                    }
                }
                debug!(kind = %R::KIND, id = %row.id(), "Row created");
                self.notify(ChangeEvent::Created, &row);
                MutationResponse::Success(row)
            }
            Err(e) => self.fail(OperationKind::Create, e),
        }
    }

    /// Patches a row, showing the change before the backend confirms it.
    pub async fn update(&self, id: &RowId, patch: RowPatch) -> MutationResponse<R> {
        let tenant = match self.inner.tenant.tenant() {
            Ok(tenant) => tenant,
            Err(e) => return self.fail(OperationKind::Update, e),
        };
        if let Err(e) = validate_update_patch(&patch) {
            return self.fail(OperationKind::Update, e.into());
        }

        let _in_flight = self.begin(OperationKind::Update);
        let opened: StoreResult<RowTicket<'_, R>> = {
            let mut state = self.lock();
            let merged = engine::find(&state.rows, id).map(|row| engine::merge_patch(row, &patch));
            match merged {
                Some(Err(e)) => Err(e.into()),
                _ => {
                    let ticket = self.open_ticket(&mut state, id);
                    state.rows = engine::update(&state.rows, id, &patch);
                    Ok(ticket)
                }
            }
        };
        let ticket = match opened {
            Ok(ticket) => ticket,
            Err(e) => return self.fail(OperationKind::Update, e),
        };

        let filter = RowFilter::new(id.clone(), tenant.get());
        let result = match self
            .inner
            .backend
            .update(R::KIND.table(), &filter, &patch)
            .await
        {
            Ok(value) => self.accept(tenant, value),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(row) => {
                let applied = {
                    let mut state = self.lock();
                    state.epoch == ticket.epoch
                        && state.resolve(id, ticket.ticket, Some(Some(row.clone())))
                };
                if !applied {
                    debug!(kind = %R::KIND, %id, "Newer mutation pending, reconciliation deferred");
                }
                self.notify(ChangeEvent::Updated, &row);
                MutationResponse::Success(row)
            }
            Err(e) => {
                self.undo(&ticket, OperationKind::Update, &e);
                self.fail(OperationKind::Update, e)
            }
        }
    }

    /// Removes a row, hiding it before the backend confirms.
    pub async fn delete(&self, id: &RowId) -> MutationResponse<bool> {
        let tenant = match self.inner.tenant.tenant() {
            Ok(tenant) => tenant,
            Err(e) => return self.fail(OperationKind::Delete, e),
        };

        let _in_flight = self.begin(OperationKind::Delete);
        let ticket = {
            let mut state = self.lock();
            let ticket = self.open_ticket(&mut state, id);
            state.rows = engine::remove(&state.rows, id);
            ticket
        };

        let filter = RowFilter::new(id.clone(), tenant.get());
        match self.inner.backend.delete(R::KIND.table(), &filter).await {
            Ok(()) => {
                {
                    let mut state = self.lock();
                    if state.epoch == ticket.epoch {
                        state.resolve(id, ticket.ticket, Some(None));
                    }
                }
                debug!(kind = %R::KIND, %id, "Row deleted");
                MutationResponse::Success(true)
            }
            Err(e) => {
                let e = StoreError::from(e);
                self.undo(&ticket, OperationKind::Delete, &e);
                self.fail(OperationKind::Delete, e)
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn lock(&self) -> MutexGuard<'_, StoreState<R>> {
        lock(&self.inner.state)
    }

    fn begin(&self, kind: OperationKind) -> InFlight<'_, R> {
        self.lock().start(kind);
        InFlight {
            state: &self.inner.state,
            kind,
        }
    }

    fn open_ticket(&self, state: &mut StoreState<R>, id: &RowId) -> RowTicket<'_, R> {
        RowTicket {
            state: &self.inner.state,
            id: id.clone(),
            ticket: state.open_ticket(id),
            epoch: state.epoch,
        }
    }

    fn undo(&self, ticket: &RowTicket<'_, R>, kind: OperationKind, cause: &StoreError) {
        let mut state = self.lock();
        if state.epoch != ticket.epoch {
            return;
        }
        let stale = state.confirmed_after(&ticket.id, ticket.ticket);
        let reconciled = state.resolve(&ticket.id, ticket.ticket, None);
        if reconciled && !stale {
            warn!(kind = %R::KIND, id = %ticket.id, op = %kind, error = %cause, "Rolled back optimistic change");
        } else {
            debug!(kind = %R::KIND, id = %ticket.id, op = %kind, "Stale failure, newer mutation kept");
        }
    }

    /// Decodes a backend row and checks it belongs to the tenant.
    fn accept(&self, tenant: TenantId, value: serde_json::Value) -> StoreResult<R> {
        let row = R::decode(value)?;
        if row.company_id() != tenant.get() {
            return Err(StoreError::TenantMismatch {
                kind: R::KIND,
                id: row.id().to_string(),
                expected: tenant.get(),
                actual: row.company_id(),
            });
        }
        Ok(row)
    }

    fn record(&self, kind: OperationKind, err: &StoreError) -> String {
        let message = error_message(err);
        warn!(kind = %R::KIND, op = %kind, error = %message, "Store operation failed");
        self.lock().errors.set(kind, Some(message.clone()));
        message
    }

    fn fail<T>(&self, kind: OperationKind, err: StoreError) -> MutationResponse<T> {
        MutationResponse::Failure(self.record(kind, &err))
    }

    fn notify(&self, event: ChangeEvent, row: &R) {
        let Some(queue) = &self.inner.notifications else {
            return;
        };
        let Some(draft) = row.notification(event) else {
            return;
        };

        let job = NotificationJob {
            source: R::KIND,
            row_id: row.id().clone(),
            company_id: row.company_id(),
            draft,
        };
        if let Err(e) = queue.enqueue(job) {
            warn!(kind = %R::KIND, id = %row.id(), error = %e, "Notification not queued");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{
        BackendDirectory, BackendNotificationSink, DispatchSettings, NotificationDispatcher,
        NotificationSink,
    };
    use crate::tenant::FixedTenant;
    use crate::testing::{wait_until, Op, ScriptedBackend};
    use async_trait::async_trait;
    use hris_core::{Department, Notice, NotificationPayload, Project};
    use hris_db::{DbError, NOTIFICATIONS_TABLE};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const MISSING_TENANT: &str = "Company ID is required but not available";

    fn backend_with(rows: Vec<serde_json::Value>) -> Arc<ScriptedBackend> {
        let backend = Arc::new(ScriptedBackend::new());
        backend.seed("departments", rows);
        backend
    }

    fn departments(backend: &Arc<ScriptedBackend>, company_id: Option<i64>) -> EntityStore<Department> {
        EntityStore::new(backend.clone(), Arc::new(FixedTenant(company_id)))
    }

    fn dept(id: i64, name: &str) -> serde_json::Value {
        json!({"id": id, "company_id": 7, "name": name})
    }

    fn names(store: &EntityStore<Department>) -> Vec<String> {
        store.rows().into_iter().map(|d| d.name).collect()
    }

    async fn loaded(rows: Vec<serde_json::Value>) -> (Arc<ScriptedBackend>, EntityStore<Department>) {
        let backend = backend_with(rows);
        let store = departments(&backend, Some(7));
        store.fetch(false).await;
        (backend, store)
    }

    // -------------------------------------------------------------------------
    // fetch
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_fetch_populates_cache() {
        let backend = backend_with(vec![dept(1, "Eng")]);
        let store = departments(&backend, Some(7));

        let rows = store.fetch(false).await;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Eng");
        assert_eq!(store.rows(), rows);
        assert!(store.is_initialized());
        assert_eq!(store.errors().fetch_error, None);
        assert!(!store.loading().fetching);
    }

    #[tokio::test]
    async fn test_fetch_is_tenant_scoped_and_ordered() {
        let backend = backend_with(vec![
            dept(1, "Ops"),
            json!({"id": 2, "company_id": 8, "name": "Other tenant"}),
            dept(3, "Eng"),
        ]);
        let store = departments(&backend, Some(7));

        store.fetch(false).await;

        assert_eq!(names(&store), vec!["Eng", "Ops"]);
    }

    #[tokio::test]
    async fn test_fetch_serves_cache_until_forced() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        assert_eq!(backend.calls(Op::Select), 1);

        store.fetch(false).await;
        assert_eq!(backend.calls(Op::Select), 1);

        store.fetch(true).await;
        store.refresh().await;
        assert_eq!(backend.calls(Op::Select), 3);
    }

    #[tokio::test]
    async fn test_empty_cache_is_never_served() {
        let (backend, store) = loaded(vec![]).await;
        assert!(store.is_initialized());

        store.fetch(false).await;

        assert_eq!(backend.calls(Op::Select), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_empty_and_records_error() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        backend.fail_next(Op::Select, DbError::QueryFailed("timeout".into()));

        let rows = store.fetch(true).await;

        assert!(rows.is_empty());
        assert_eq!(names(&store), vec!["Eng"]);
        assert_eq!(store.errors().fetch_error.as_deref(), Some("Query failed: timeout"));
        assert!(!store.loading().fetching);
    }

    #[tokio::test]
    async fn test_fetch_rejects_undecodable_row() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        backend.respond_next_select(vec![dept(1, "Eng"), json!({"id": 2, "company_id": 7})]);

        let rows = store.fetch(true).await;

        assert!(rows.is_empty());
        assert_eq!(names(&store), vec!["Eng"]);
        let error = store.errors().fetch_error.unwrap();
        assert!(error.starts_with("Invalid department row from backend"), "{error}");
    }

    #[tokio::test]
    async fn test_fetch_rejects_foreign_tenant_row() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        backend.respond_next_select(vec![json!({"id": 5, "company_id": 9, "name": "Leak"})]);

        let rows = store.fetch(true).await;

        assert!(rows.is_empty());
        assert_eq!(names(&store), vec!["Eng"]);
        assert_eq!(
            store.errors().fetch_error.as_deref(),
            Some("department row 5 belongs to company 9, expected 7")
        );
    }

    #[tokio::test]
    async fn test_fetch_error_cleared_when_fetch_starts_again() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        backend.fail_next(Op::Select, DbError::QueryFailed("timeout".into()));
        store.fetch(true).await;
        assert!(store.errors().fetch_error.is_some());

        store.fetch(true).await;

        assert_eq!(store.errors().fetch_error, None);
    }

    // -------------------------------------------------------------------------
    // Missing tenant
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_tenant_never_reaches_backend() {
        let backend = backend_with(vec![dept(1, "Eng")]);
        let store = departments(&backend, None);

        assert!(store.fetch(true).await.is_empty());
        let created = store.create(RowPatch::new().set("name", "X")).await;
        let updated = store.update(&RowId::Int(1), RowPatch::new().set("name", "Y")).await;
        let deleted = store.delete(&RowId::Int(1)).await;

        assert_eq!(created, MutationResponse::Failure(MISSING_TENANT.to_string()));
        assert_eq!(updated.error(), Some(MISSING_TENANT));
        assert_eq!(deleted.error(), Some(MISSING_TENANT));

        let errors = store.errors();
        assert_eq!(errors.fetch_error.as_deref(), Some(MISSING_TENANT));
        assert_eq!(errors.create_error.as_deref(), Some(MISSING_TENANT));
        assert_eq!(errors.update_error.as_deref(), Some(MISSING_TENANT));
        assert_eq!(errors.delete_error.as_deref(), Some(MISSING_TENANT));
        assert_eq!(backend.total_calls(), 0);
        assert!(!store.loading().any());
    }

    #[tokio::test]
    async fn test_non_positive_tenant_is_missing() {
        let backend = backend_with(vec![]);
        let store = departments(&backend, Some(0));

        let response = store.create(RowPatch::new().set("name", "X")).await;

        assert_eq!(response.error(), Some(MISSING_TENANT));
        assert_eq!(backend.total_calls(), 0);
    }

    // -------------------------------------------------------------------------
    // create
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_appends_server_row_after_confirmation() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        let release = backend.hold_next(Op::Insert);

        let task = tokio::spawn({
            let store = store.clone();
            async move { store.create(RowPatch::new().set("name", "Ops")).await }
        });
        wait_until(|| store.loading().creating).await;
        assert_eq!(names(&store), vec!["Eng"]);

        release.send(()).unwrap();
        let response = task.await.unwrap();

        let created = response.data().cloned().unwrap();
        assert_eq!(created.company_id, 7);
        assert_eq!(created.id, RowId::Int(2));
        assert!(created.created_at.is_some());
        assert_eq!(names(&store), vec!["Eng", "Ops"]);
        assert_eq!(store.get_by_id(&RowId::Int(2)), Some(created));
        assert!(!store.loading().creating);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_cache() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        backend.fail_next(Op::Insert, DbError::duplicate("departments.name", "Ops"));

        let response = store.create(RowPatch::new().set("name", "Ops")).await;

        assert!(!response.is_success());
        assert_eq!(
            store.errors().create_error.as_deref(),
            Some("Duplicate departments.name: 'Ops' already exists")
        );
        assert_eq!(names(&store), vec!["Eng"]);
    }

    #[tokio::test]
    async fn test_create_rejects_caller_supplied_tenant() {
        let (backend, store) = loaded(vec![]).await;

        let response = store
            .create(RowPatch::new().set("name", "Ops").set("company_id", 9))
            .await;

        assert_eq!(response.error(), Some("company_id cannot be changed"));
        assert_eq!(backend.calls(Op::Insert), 0);
    }

    #[tokio::test]
    async fn test_create_requires_order_key() {
        let (backend, store) = loaded(vec![]).await;

        let response = store.create(RowPatch::new().set("description", "no name")).await;

        assert_eq!(response.error(), Some("name is required"));
        assert_eq!(backend.calls(Op::Insert), 0);
    }

    // -------------------------------------------------------------------------
    // update
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_update_reconciles_with_server_row() {
        let (backend, store) = loaded(vec![dept(1, "Eng"), dept(2, "Ops")]).await;

        let response = store
            .update(&RowId::Int(1), RowPatch::new().set("name", "Engineering"))
            .await;

        let server_row = Department::decode(backend.rows("departments")[0].clone()).unwrap();
        assert!(server_row.updated_at.is_some());
        assert_eq!(response, MutationResponse::Success(server_row.clone()));
        assert_eq!(store.rows()[0], server_row);
        assert_eq!(names(&store), vec!["Engineering", "Ops"]);
        assert_eq!(store.errors().update_error, None);
    }

    #[tokio::test]
    async fn test_update_failure_rolls_back_exactly() {
        let (backend, store) = loaded(vec![dept(1, "A"), dept(2, "B"), dept(3, "C")]).await;
        let before = store.rows();
        backend.fail_next(Op::Update, DbError::QueryFailed("boom".into()));

        let response = store
            .update(&RowId::Int(2), RowPatch::new().set("description", "changed"))
            .await;

        assert_eq!(response.error(), Some("Query failed: boom"));
        assert_eq!(store.rows(), before);
    }

    #[tokio::test]
    async fn test_update_rejects_identity_and_bad_types_locally() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;

        let identity = store.update(&RowId::Int(1), RowPatch::new().set("id", 4)).await;
        let bad_type = store.update(&RowId::Int(1), RowPatch::new().set("name", 42)).await;
        let empty = store.update(&RowId::Int(1), RowPatch::new()).await;

        assert_eq!(identity.error(), Some("id cannot be changed"));
        assert!(bad_type.error().unwrap().starts_with("patch has invalid format"));
        assert_eq!(empty.error(), Some("patch is required"));
        assert_eq!(backend.calls(Op::Update), 0);
        assert_eq!(names(&store), vec!["Eng"]);
        assert!(!store.loading().updating);
    }

    #[tokio::test]
    async fn test_update_of_foreign_row_fails_without_change() {
        let backend = backend_with(vec![
            dept(1, "Eng"),
            json!({"id": 2, "company_id": 8, "name": "Other"}),
        ]);
        let store = departments(&backend, Some(7));
        store.fetch(false).await;

        let response = store.update(&RowId::Int(2), RowPatch::new().set("name", "Mine")).await;

        assert_eq!(response.error(), Some("departments not found: 2"));
        assert_eq!(backend.rows("departments")[1]["name"], "Other");
        assert_eq!(names(&store), vec!["Eng"]);
    }

    // -------------------------------------------------------------------------
    // delete
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_delete_failure_restores_row_position() {
        let (backend, store) = loaded(vec![dept(1, "A"), dept(2, "B"), dept(3, "C")]).await;
        let before = store.rows();
        backend.fail_next(Op::Delete, DbError::ForeignKeyViolation {
            message: "positions reference this department".into(),
        });

        let response = store.delete(&RowId::Int(2)).await;

        assert!(!response.is_success());
        assert_eq!(store.rows(), before);
        assert_eq!(
            store.errors().delete_error.as_deref(),
            Some("Foreign key violation: positions reference this department")
        );
    }

    #[tokio::test]
    async fn test_delete_of_unknown_row_reports_not_found() {
        let (_backend, store) = loaded(vec![dept(1, "Eng")]).await;

        let response = store.delete(&RowId::Int(42)).await;

        assert_eq!(response.error(), Some("departments not found: 42"));
        assert_eq!(names(&store), vec!["Eng"]);
    }

    // -------------------------------------------------------------------------
    // Scenarios
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn scenario_a_first_fetch() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond_next_select(vec![json!({"id": 1, "name": "Eng", "company_id": 7})]);
        let store = departments(&backend, Some(7));

        store.fetch(false).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.rows()[0].name, "Eng");
        assert!(store.is_initialized());
        assert_eq!(store.errors().fetch_error, None);
    }

    #[tokio::test]
    async fn scenario_b_failed_update_rolls_back() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        let release = backend.hold_next(Op::Update);
        backend.fail_next(Op::Update, DbError::QueryFailed("network down".into()));

        let task = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .update(&RowId::Int(1), RowPatch::new().set("name", "Engineering"))
                    .await
            }
        });
        wait_until(|| store.loading().updating).await;
        assert_eq!(names(&store), vec!["Engineering"]);

        release.send(()).unwrap();
        let response = task.await.unwrap();

        assert!(!response.is_success());
        assert_eq!(names(&store), vec!["Eng"]);
        assert!(store.errors().update_error.is_some());
        assert!(!store.loading().updating);
    }

    #[tokio::test]
    async fn scenario_c_successful_delete() {
        let (backend, store) = loaded(vec![dept(1, "A"), dept(2, "B")]).await;
        let release = backend.hold_next(Op::Delete);

        let task = tokio::spawn({
            let store = store.clone();
            async move { store.delete(&RowId::Int(2)).await }
        });
        wait_until(|| store.loading().deleting).await;
        assert_eq!(names(&store), vec!["A"]);

        release.send(()).unwrap();
        let response = task.await.unwrap();

        assert_eq!(response, MutationResponse::Success(true));
        assert_eq!(names(&store), vec!["A"]);
        assert_eq!(store.errors().delete_error, None);
        assert_eq!(backend.rows("departments").len(), 1);
    }

    #[tokio::test]
    async fn scenario_d_create_without_tenant() {
        let backend = backend_with(vec![]);
        let store = departments(&backend, None);

        let response = store.create(RowPatch::new().set("name", "X")).await;

        assert_eq!(backend.total_calls(), 0);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": false, "error": MISSING_TENANT})
        );
    }

    // -------------------------------------------------------------------------
    // Loading flags and cancellation
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_loading_flags_are_independent() {
        let (backend, store) = loaded(vec![dept(1, "A"), dept(2, "B")]).await;
        let release_create = backend.hold_next(Op::Insert);
        let release_delete = backend.hold_next(Op::Delete);

        let create = tokio::spawn({
            let store = store.clone();
            async move { store.create(RowPatch::new().set("name", "C")).await }
        });
        let delete = tokio::spawn({
            let store = store.clone();
            async move { store.delete(&RowId::Int(1)).await }
        });
        wait_until(|| {
            let loading = store.loading();
            loading.creating && loading.deleting
        })
        .await;

        release_create.send(()).unwrap();
        assert!(create.await.unwrap().is_success());
        let loading = store.loading();
        assert!(!loading.creating);
        assert!(loading.deleting);

        release_delete.send(()).unwrap();
        assert!(delete.await.unwrap().is_success());
        assert!(!store.loading().any());
        assert_eq!(names(&store), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_same_kind_flag_stays_set_until_last_call_finishes() {
        let (backend, store) = loaded(vec![dept(1, "A"), dept(2, "B")]).await;
        let first = backend.hold_next(Op::Update);
        let second = backend.hold_next(Op::Update);

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(1), RowPatch::new().set("name", "A2")).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(2), RowPatch::new().set("name", "B2")).await }
        });
        wait_until(|| backend.calls(Op::Update) == 2).await;

        first.send(()).unwrap();
        second.send(()).unwrap();
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert!(a.is_success() && b.is_success());
        assert!(!store.loading().updating);
        assert_eq!(names(&store), vec!["A2", "B2"]);
    }

    #[tokio::test]
    async fn test_dropped_operation_clears_loading_flag() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        let _release = backend.hold_next(Op::Update);

        let task = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(1), RowPatch::new().set("name", "X")).await }
        });
        wait_until(|| store.loading().updating).await;

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert!(!store.loading().updating);
        let response = store.update(&RowId::Int(1), RowPatch::new().set("name", "Y")).await;
        assert!(response.is_success());
        assert_eq!(names(&store), vec!["Y"]);
    }

    // -------------------------------------------------------------------------
    // Sequencing
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_stale_failure_does_not_clobber_newer_success() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        let release_old = backend.hold_next(Op::Update);

        let old = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(1), RowPatch::new().set("name", "Old")).await }
        });
        wait_until(|| store.loading().updating).await;

        let newer = store.update(&RowId::Int(1), RowPatch::new().set("name", "New")).await;
        assert!(newer.is_success());

        backend.fail_next(Op::Update, DbError::QueryFailed("late failure".into()));
        release_old.send(()).unwrap();
        assert!(!old.await.unwrap().is_success());

        assert_eq!(names(&store), vec!["New"]);
        assert_eq!(store.errors().update_error.as_deref(), Some("Query failed: late failure"));
    }

    #[tokio::test]
    async fn test_stale_success_does_not_overwrite_newer_optimistic_patch() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        let release_old = backend.hold_next(Op::Update);
        let release_new = backend.hold_next(Op::Update);

        let old = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(1), RowPatch::new().set("name", "Old")).await }
        });
        wait_until(|| backend.calls(Op::Update) == 1).await;
        let newer = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(1), RowPatch::new().set("name", "New")).await }
        });
        wait_until(|| backend.calls(Op::Update) == 2).await;

        release_old.send(()).unwrap();
        assert!(old.await.unwrap().is_success());
        assert_eq!(names(&store), vec!["New"]);

        backend.fail_next(Op::Update, DbError::QueryFailed("rejected".into()));
        release_new.send(()).unwrap();
        assert!(!newer.await.unwrap().is_success());

        // Falls back to what the backend last confirmed.
        assert_eq!(names(&store), vec!["Old"]);
    }

    #[tokio::test]
    async fn test_older_success_applies_after_newer_failure() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        let release_old = backend.hold_next(Op::Update);
        let release_new = backend.hold_next(Op::Update);

        let old = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(1), RowPatch::new().set("name", "Old")).await }
        });
        wait_until(|| backend.calls(Op::Update) == 1).await;
        let newer = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(1), RowPatch::new().set("name", "New")).await }
        });
        wait_until(|| backend.calls(Op::Update) == 2).await;

        backend.fail_next(Op::Update, DbError::QueryFailed("rejected".into()));
        release_new.send(()).unwrap();
        assert!(!newer.await.unwrap().is_success());
        assert_eq!(names(&store), vec!["Eng"]);

        release_old.send(()).unwrap();
        let response = old.await.unwrap();

        let MutationResponse::Success(row) = response else {
            panic!("older update should succeed");
        };
        assert_eq!(row.name, "Old");
        assert_eq!(names(&store), vec!["Old"]);
        assert!(!store.loading().updating);
    }

    #[tokio::test]
    async fn test_update_success_applies_after_later_delete_fails() {
        let (backend, store) = loaded(vec![dept(1, "Eng"), dept(2, "Ops")]).await;
        let release_update = backend.hold_next(Op::Update);
        let release_delete = backend.hold_next(Op::Delete);

        let update = tokio::spawn({
            let store = store.clone();
            async move { store.update(&RowId::Int(1), RowPatch::new().set("name", "Old")).await }
        });
        wait_until(|| backend.calls(Op::Update) == 1).await;
        let delete = tokio::spawn({
            let store = store.clone();
            async move { store.delete(&RowId::Int(1)).await }
        });
        wait_until(|| backend.calls(Op::Delete) == 1).await;
        assert_eq!(names(&store), vec!["Ops"]);

        backend.fail_next(Op::Delete, DbError::QueryFailed("locked".into()));
        release_delete.send(()).unwrap();
        assert!(!delete.await.unwrap().is_success());
        assert_eq!(names(&store), vec!["Eng", "Ops"]);

        release_update.send(()).unwrap();
        assert!(update.await.unwrap().is_success());
        assert_eq!(names(&store), vec!["Old", "Ops"]);
    }

    #[tokio::test]
    async fn test_reset_discards_late_results() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        let release = backend.hold_next(Op::Insert);

        let task = tokio::spawn({
            let store = store.clone();
            async move { store.create(RowPatch::new().set("name", "Ops")).await }
        });
        wait_until(|| store.loading().creating).await;
        store.reset();

        release.send(()).unwrap();
        assert!(task.await.unwrap().is_success());

        assert!(store.is_empty());
        assert!(!store.is_initialized());
    }

    // -------------------------------------------------------------------------
    // Error state
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_stale_error_persists_until_cleared() {
        let (backend, store) = loaded(vec![dept(1, "Eng")]).await;
        backend.fail_next(Op::Delete, DbError::QueryFailed("boom".into()));
        store.delete(&RowId::Int(1)).await;

        assert!(store.create(RowPatch::new().set("name", "Ops")).await.is_success());
        assert!(store.errors().delete_error.is_some());

        store.clear_errors();
        assert!(!store.errors().has_any());
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (_backend, store) = loaded(vec![dept(1, "Eng")]).await;

        let status = store.status();

        assert_eq!(status.kind, EntityKind::Department);
        assert!(status.initialized);
        assert_eq!(status.rows, 1);
        assert_eq!(store.kind(), EntityKind::Department);
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn create_notification(&self, _: &NotificationPayload) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Notification("smtp relay down".into()))
        }
    }

    fn fast_retries() -> DispatchSettings {
        DispatchSettings {
            queue_capacity: 8,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_notice_create_queues_notification() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.seed(
            "employees",
            vec![
                json!({"id": "e1", "company_id": 7, "first_name": "Amara", "last_name": "O", "email": "a@x", "department_id": 1}),
                json!({"id": "e2", "company_id": 7, "first_name": "Bilal", "last_name": "H", "email": "b@x", "department_id": 2}),
            ],
        );
        let (queue, _worker) = NotificationDispatcher::spawn(
            Arc::new(BackendDirectory::new(backend.clone())),
            Arc::new(BackendNotificationSink::new(backend.clone())),
            fast_retries(),
        );
        let notices: EntityStore<Notice> =
            EntityStore::with_notifications(backend.clone(), Arc::new(FixedTenant::new(7)), queue.clone());

        let response = notices
            .create(
                RowPatch::new()
                    .set("title", "Payroll cutoff")
                    .set("urgency", "high")
                    .set("department_id", 1),
            )
            .await;
        assert!(response.is_success());

        wait_until(|| queue.stats().delivered == 1).await;
        let stored = backend.rows(NOTIFICATIONS_TABLE);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["title"], "New notice: Payroll cutoff");
        assert_eq!(stored[0]["priority"], "high");
        assert_eq!(stored[0]["recipient_id"], json!(["e1"]));
        assert_eq!(stored[0]["company_id"], 7);
    }

    #[tokio::test]
    async fn test_failing_notifications_never_fail_the_mutation() {
        let backend = Arc::new(ScriptedBackend::new());
        let sink = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let (queue, _worker) = NotificationDispatcher::spawn(
            Arc::new(BackendDirectory::new(backend.clone())),
            sink.clone(),
            fast_retries(),
        );
        let projects: EntityStore<Project> =
            EntityStore::with_notifications(backend.clone(), Arc::new(FixedTenant::new(7)), queue.clone());

        let response = projects
            .create(
                RowPatch::new()
                    .set("project_title", "Audit")
                    .set("assignees", json!(["e1", "e2"]))
                    .set("supervisor_id", "e3"),
            )
            .await;

        assert!(response.is_success());
        assert_eq!(projects.errors().create_error, None);
        wait_until(|| queue.stats().failed == 1).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stopped_dispatcher_does_not_affect_mutations() {
        let backend = Arc::new(ScriptedBackend::new());
        let (queue, worker) = NotificationDispatcher::spawn(
            Arc::new(BackendDirectory::new(backend.clone())),
            Arc::new(BackendNotificationSink::new(backend.clone())),
            fast_retries(),
        );
        queue.shutdown().await.unwrap();
        worker.await.unwrap();
        let notices: EntityStore<Notice> =
            EntityStore::with_notifications(backend.clone(), Arc::new(FixedTenant::new(7)), queue.clone());

        let response = notices.create(RowPatch::new().set("title", "Holiday")).await;

        assert!(response.is_success());
        assert_eq!(queue.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_rows_without_notifications_queue_nothing() {
        let backend = backend_with(vec![]);
        let (queue, _worker) = NotificationDispatcher::spawn(
            Arc::new(BackendDirectory::new(backend.clone())),
            Arc::new(BackendNotificationSink::new(backend.clone())),
            fast_retries(),
        );
        let store: EntityStore<Department> =
            EntityStore::with_notifications(backend.clone(), Arc::new(FixedTenant::new(7)), queue.clone());

        assert!(store.create(RowPatch::new().set("name", "Eng")).await.is_success());

        assert_eq!(queue.stats().enqueued, 0);
    }
}
