//! In-memory implementation of [`Session`].
//!
//! Committed rows live in a shared [`MemoryStore`]; each [`MemorySession`]
//! buffers its uncommitted writes privately, so other sessions never observe
//! them while the owner reads them back. Keys come from shared sequences that
//! are not reset by rollback, as in a real database.

use super::Session;
use crate::errors::{DbError, TransactionError, TxOp};
use crate::extract::EntityKind;
use crate::model::{CyclicStat, RunKey, RunRecord, SystemKey, SystemRecord};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default, Clone)]
struct Rows {
    systems: Vec<(SystemKey, SystemRecord)>,
    runs: Vec<(RunKey, SystemKey, RunRecord)>,
    cyclic: Vec<(RunKey, CyclicStat)>,
}

#[derive(Debug, Default)]
struct Tables {
    committed: Rows,
    next_system: i64,
    next_run: i64,
}

/// Shared committed state; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
            open: true,
            pending: None,
            fail: None,
            cyclic_calls: 0,
            stats: SessionStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // Poisoning is ignored; committed rows stay readable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn system_count(&self) -> usize {
        self.lock().committed.systems.len()
    }

    pub fn run_count(&self) -> usize {
        self.lock().committed.runs.len()
    }

    pub fn cyclic_count(&self) -> usize {
        self.lock().committed.cyclic.len()
    }

    pub fn cyclic_count_for(&self, run: RunKey) -> usize {
        self.lock()
            .committed
            .cyclic
            .iter()
            .filter(|(k, _)| *k == run)
            .count()
    }

    pub fn runs_for(&self, system: SystemKey) -> Vec<RunKey> {
        self.lock()
            .committed
            .runs
            .iter()
            .filter(|(_, s, _)| *s == system)
            .map(|(k, _, _)| *k)
            .collect()
    }

    pub fn system(&self, key: SystemKey) -> Option<SystemRecord> {
        self.lock()
            .committed
            .systems
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, s)| s.clone())
    }
}

/// Where a [`MemorySession`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    Commit,
    Rollback,
    FindSystem,
    InsertSystem,
    InsertRun,
    /// The n-th (0-based) cyclictest insert of the transaction errors.
    InsertCyclic(usize),
    /// The n-th cyclictest insert reports success but writes nothing.
    DropCyclic(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub begins: usize,
    pub commits: usize,
    /// Rollbacks that discarded an open transaction.
    pub rollbacks: usize,
    /// All rollback calls, including no-ops.
    pub rollback_calls: usize,
}

pub struct MemorySession {
    store: MemoryStore,
    open: bool,
    pending: Option<Rows>,
    fail: Option<FailPoint>,
    cyclic_calls: usize,
    stats: SessionStats,
}

impl MemorySession {
    pub fn fail_at(mut self, point: FailPoint) -> Self {
        self.fail = Some(point);
        self
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    fn check(&self, point: FailPoint) -> Result<(), DbError> {
        if !self.open {
            return Err(DbError::Closed);
        }
        if self.fail == Some(point) {
            return Err(DbError::Injected(point.name()));
        }
        Ok(())
    }

    fn pending_mut(&mut self) -> Result<&mut Rows, DbError> {
        self.pending.as_mut().ok_or(DbError::NoTransaction)
    }

    fn system_visible(&self, key: SystemKey) -> bool {
        let own = self
            .pending
            .as_ref()
            .is_some_and(|p| p.systems.iter().any(|(k, _)| *k == key));
        own || self.store.lock().committed.systems.iter().any(|(k, _)| *k == key)
    }

    fn run_visible(&self, key: RunKey) -> bool {
        let own = self
            .pending
            .as_ref()
            .is_some_and(|p| p.runs.iter().any(|(k, _, _)| *k == key));
        own || self.store.lock().committed.runs.iter().any(|(k, _, _)| *k == key)
    }
}

impl FailPoint {
    fn name(self) -> &'static str {
        match self {
            FailPoint::Begin => "begin",
            FailPoint::Commit => "commit",
            FailPoint::Rollback => "rollback",
            FailPoint::FindSystem => "find_system",
            FailPoint::InsertSystem => "insert_system",
            FailPoint::InsertRun => "insert_run",
            FailPoint::InsertCyclic(_) => "insert_cyclic",
            FailPoint::DropCyclic(_) => "drop_cyclic",
        }
    }
}

impl Session for MemorySession {
    fn begin(&mut self) -> Result<(), TransactionError> {
        self.check(FailPoint::Begin)
            .map_err(|e| TransactionError::new(TxOp::Begin, e))?;
        if self.pending.is_some() {
            return Err(TransactionError::new(TxOp::Begin, DbError::TransactionActive));
        }
        self.pending = Some(Rows::default());
        self.cyclic_calls = 0;
        self.stats.begins += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TransactionError> {
        self.check(FailPoint::Commit)
            .map_err(|e| TransactionError::new(TxOp::Commit, e))?;
        let rows = self
            .pending
            .take()
            .ok_or_else(|| TransactionError::new(TxOp::Commit, DbError::NoTransaction))?;
        let mut tables = self.store.lock();
        tables.committed.systems.extend(rows.systems);
        tables.committed.runs.extend(rows.runs);
        tables.committed.cyclic.extend(rows.cyclic);
        self.stats.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), TransactionError> {
        self.stats.rollback_calls += 1;
        if self.pending.is_none() {
            return Ok(());
        }
        if self.fail == Some(FailPoint::Rollback) {
            // The transaction is still discarded, as a dropped connection would.
            self.pending = None;
            return Err(TransactionError::new(
                TxOp::Rollback,
                DbError::Injected(FailPoint::Rollback.name()),
            ));
        }
        self.pending = None;
        self.stats.rollbacks += 1;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    fn disconnect(&mut self) {
        if !self.open {
            return;
        }
        if self.pending.take().is_some() {
            self.stats.rollbacks += 1;
        }
        self.open = false;
    }

    fn find_system(&mut self, fingerprint: &str) -> Result<Option<SystemKey>, DbError> {
        self.check(FailPoint::FindSystem)?;
        let own = self.pending.as_ref().and_then(|p| {
            p.systems
                .iter()
                .find(|(_, s)| s.fingerprint == fingerprint)
                .map(|(k, _)| *k)
        });
        if own.is_some() {
            return Ok(own);
        }
        Ok(self
            .store
            .lock()
            .committed
            .systems
            .iter()
            .find(|(_, s)| s.fingerprint == fingerprint)
            .map(|(k, _)| *k))
    }

    fn insert_system(&mut self, system: &SystemRecord) -> Result<SystemKey, DbError> {
        self.check(FailPoint::InsertSystem)?;
        self.pending_mut()?;
        let key = {
            let mut tables = self.store.lock();
            tables.next_system += 1;
            SystemKey(tables.next_system)
        };
        self.pending_mut()?.systems.push((key, system.clone()));
        Ok(key)
    }

    fn insert_run(&mut self, system: SystemKey, run: &RunRecord) -> Result<RunKey, DbError> {
        self.check(FailPoint::InsertRun)?;
        self.pending_mut()?;
        if !self.system_visible(system) {
            return Err(DbError::UnknownKey {
                entity: EntityKind::System,
                key: system.0,
            });
        }
        let key = {
            let mut tables = self.store.lock();
            tables.next_run += 1;
            RunKey(tables.next_run)
        };
        self.pending_mut()?.runs.push((key, system, run.clone()));
        Ok(key)
    }

    fn insert_cyclic(&mut self, run: RunKey, stat: &CyclicStat) -> Result<usize, DbError> {
        let call = self.cyclic_calls;
        self.check(FailPoint::InsertCyclic(call))?;
        self.pending_mut()?;
        if !self.run_visible(run) {
            return Err(DbError::UnknownKey {
                entity: EntityKind::Run,
                key: run.0,
            });
        }
        self.cyclic_calls += 1;
        if self.fail == Some(FailPoint::DropCyclic(call)) {
            return Ok(0);
        }
        self.pending_mut()?.cyclic.push((run, stat.clone()));
        Ok(1)
    }
}
