//! Scripted data service for store tests.
//!
//! Wraps [`MemoryDataService`] and lets a test hold a call mid-flight,
//! fail the next call of an operation, or replace the next select result.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hris_core::RowPatch;
use hris_db::{DataService, DbError, DbResult, MemoryDataService, RowFilter, SelectQuery};
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Default)]
struct Script {
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, VecDeque<DbError>>,
    holds: HashMap<Op, VecDeque<oneshot::Receiver<()>>>,
    canned_selects: VecDeque<Vec<Value>>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    inner: MemoryDataService,
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.inner.seed_rows(table, rows).expect("known table");
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.inner.rows(table)
    }

    pub fn calls(&self, op: Op) -> usize {
        self.script().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.script().calls.values().sum()
    }

    /// The next call of `op` fails with `err`.
    pub fn fail_next(&self, op: Op, err: DbError) {
        self.script().failures.entry(op).or_default().push_back(err);
    }

    /// The next call of `op` waits until the returned sender fires (or is
    /// dropped).
    pub fn hold_next(&self, op: Op) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script().holds.entry(op).or_default().push_back(rx);
        tx
    }

    /// The next select returns `rows` instead of querying.
    pub fn respond_next_select(&self, rows: Vec<Value>) {
        self.script().canned_selects.push_back(rows);
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, op: Op) -> DbResult<()> {
        let gate = {
            let mut script = self.script();
            *script.calls.entry(op).or_default() += 1;
            script.holds.get_mut(&op).and_then(VecDeque::pop_front)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        match self.script().failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataService for ScriptedBackend {
    async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Value>> {
        self.enter(Op::Select).await?;
        let canned = self.script().canned_selects.pop_front();
        match canned {
            Some(rows) => Ok(rows),
            None => self.inner.select(query).await,
        }
    }

    async fn insert(&self, table: &str, row: &RowPatch) -> DbResult<Value> {
        self.enter(Op::Insert).await?;
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: &str, filter: &RowFilter, patch: &RowPatch) -> DbResult<Value> {
        self.enter(Op::Update).await?;
        self.inner.update(table, filter, patch).await
    }

    async fn delete(&self, table: &str, filter: &RowFilter) -> DbResult<()> {
        self.enter(Op::Delete).await?;
        self.inner.delete(table, filter).await
    }
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
