//! Transactional registration of one report.
//!
//! ```text
//! NEW -> system -> run -> cyclictest -> commit -> SUCCESS
//!         any failure -> one rollback -> failing step's status
//! ```
//!
//! System fields are extracted before the transaction opens, so an unusable
//! document is reported as `XML_PARSE_FAILED` without touching the session.
//! There is no retry here; callers re-invoke [`Registrar::process_report`].

use crate::document::ReportDocument;
use crate::errors::{DbError, ExtractionError, RegistrationError, TransactionError, TxOp};
use crate::extract::{extract, EntityKind, ExtractionTemplate};
use crate::model::{CyclicStat, Outcome, RunKey, RunRecord, SystemRecord, SystemRegistration};
use crate::status::{ErrorKind, Status};
use crate::storage::{self, DbConfig, Session};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RegistrationPolicy {
    /// Reuse the key of a committed system with the same fingerprint.
    pub dedup: bool,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self { dedup: true }
    }
}

#[derive(Debug, Clone)]
pub struct Registrar {
    template: Arc<ExtractionTemplate>,
    policy: RegistrationPolicy,
}

impl Registrar {
    pub fn new(template: ExtractionTemplate, policy: RegistrationPolicy) -> Self {
        Self {
            template: Arc::new(template),
            policy,
        }
    }

    pub fn template(&self) -> &ExtractionTemplate {
        &self.template
    }

    pub fn policy(&self) -> &RegistrationPolicy {
        &self.policy
    }

    pub fn extract_system(&self, document: &ReportDocument) -> Result<SystemRecord, ExtractionError> {
        let set = extract(document, &self.template, EntityKind::System)?;
        SystemRecord::from_fields(set.single()?, &self.template.system.identity)
    }

    /// Looks the system up by fingerprint (when dedup is on) or inserts it.
    pub fn register_system<S: Session + ?Sized>(
        &self,
        session: &mut S,
        document: &ReportDocument,
    ) -> Result<SystemRegistration, RegistrationError> {
        let record = self.extract_system(document)?;
        self.store_system(session, &record)
    }

    fn store_system<S: Session + ?Sized>(
        &self,
        session: &mut S,
        record: &SystemRecord,
    ) -> Result<SystemRegistration, RegistrationError> {
        let db = |e| RegistrationError::database(EntityKind::System, e);

        if self.policy.dedup {
            if let Some(key) = session.find_system(&record.fingerprint).map_err(db)? {
                tracing::debug!(event = "system.reused", syskey = key.0, hostname = %record.hostname);
                return Ok(SystemRegistration { key, reused: true });
            }
        }

        let key = session.insert_system(record).map_err(db)?;
        tracing::debug!(event = "system.inserted", syskey = key.0, hostname = %record.hostname);
        Ok(SystemRegistration { key, reused: false })
    }

    pub fn register_run<S: Session + ?Sized>(
        &self,
        session: &mut S,
        document: &ReportDocument,
        system: SystemRegistration,
        report_filename: Option<&str>,
    ) -> Result<RunKey, RegistrationError> {
        let set = extract(document, &self.template, EntityKind::Run)?;
        let record = RunRecord::from_fields(set.single()?, report_filename)?;
        let key = session
            .insert_run(system.key, &record)
            .map_err(|e| RegistrationError::database(EntityKind::Run, e))?;
        tracing::debug!(event = "run.inserted", syskey = system.key.0, rterid = key.0);
        Ok(key)
    }

    /// Inserts every cyclictest row for `run`; returns how many were written.
    pub fn register_cyclictest<S: Session + ?Sized>(
        &self,
        session: &mut S,
        document: &ReportDocument,
        run: RunKey,
    ) -> Result<usize, RegistrationError> {
        let set = extract(document, &self.template, EntityKind::Cyclictest)?;
        let stats = set
            .rows
            .iter()
            .map(CyclicStat::from_fields)
            .collect::<Result<Vec<_>, _>>()?;

        let mut inserted = 0;
        for stat in &stats {
            inserted += session
                .insert_cyclic(run, stat)
                .map_err(|e| RegistrationError::database(EntityKind::Cyclictest, e))?;
        }

        if inserted != stats.len() {
            return Err(RegistrationError::Incomplete {
                inserted,
                expected: stats.len(),
            });
        }
        tracing::debug!(event = "cyclictest.inserted", rterid = run.0, rows = inserted);
        Ok(inserted)
    }

    /// Registers system, run and cyclictest results as one unit of work.
    pub fn process_report<S: Session + ?Sized>(
        &self,
        session: &mut S,
        document: &ReportDocument,
        report_filename: Option<&str>,
    ) -> Outcome {
        self.process_report_with(session, document, report_filename, |_| Ok(()))
    }

    /// Like [`Registrar::process_report`], running `before_commit` inside the
    /// transaction once every step succeeded. Its failure rolls the report
    /// back as a `GENERAL_DB_ERROR`.
    pub fn process_report_with<S, F>(
        &self,
        session: &mut S,
        document: &ReportDocument,
        report_filename: Option<&str>,
        before_commit: F,
    ) -> Outcome
    where
        S: Session + ?Sized,
        F: FnOnce(&mut S) -> Result<(), DbError>,
    {
        let report = report_filename.unwrap_or("-");

        let system = match self.extract_system(document) {
            Ok(s) => s,
            Err(e) => {
                let status = Status::classify(ErrorKind::from(&e));
                tracing::warn!(event = "report.unparseable", report, status = %status, error = %e);
                return Outcome::failed(status, None);
            }
        };

        if let Err(e) = session.begin() {
            let status = Status::classify(ErrorKind::Transaction);
            tracing::error!(event = "report.begin_failed", report, status = %status, error = %e);
            return Outcome::failed(status, None);
        }

        let mut registered = None;
        let steps = self.run_steps(session, document, &system, report_filename, &mut registered);

        match steps {
            Ok((run, rows)) => match before_commit(&mut *session)
                .map_err(|e| TransactionError::new(TxOp::Commit, e))
                .and_then(|()| session.commit())
            {
                Ok(()) => {
                    tracing::info!(
                        event = "report.registered",
                        report,
                        syskey = registered.map(|r| r.key.0),
                        rterid = run.0,
                        cyclictest_rows = rows,
                    );
                    Outcome {
                        status: Status::Success,
                        system: registered,
                        run: Some(run),
                    }
                }
                Err(e) => {
                    let status = Status::classify(ErrorKind::Transaction);
                    tracing::error!(event = "report.commit_failed", report, status = %status, error = %e);
                    abort(session, report);
                    Outcome::failed(status, registered)
                }
            },
            Err(e) => {
                let status = e.status();
                tracing::warn!(event = "report.step_failed", report, status = %status, error = %e);
                abort(session, report);
                Outcome::failed(status, registered)
            }
        }
    }

    fn run_steps<S: Session + ?Sized>(
        &self,
        session: &mut S,
        document: &ReportDocument,
        system: &SystemRecord,
        report_filename: Option<&str>,
        registered: &mut Option<SystemRegistration>,
    ) -> Result<(RunKey, usize), RegistrationError> {
        let sys = self.store_system(session, system)?;
        *registered = Some(sys);
        let run = self.register_run(session, document, sys, report_filename)?;
        let rows = self.register_cyclictest(session, document, run)?;
        Ok((run, rows))
    }

    /// Loads a report file and processes it; unreadable files are parse failures.
    pub fn process_path<S: Session + ?Sized>(&self, session: &mut S, path: &Path) -> Outcome {
        self.process_path_with(session, path, |_| Ok(()))
    }

    pub fn process_path_with<S, F>(&self, session: &mut S, path: &Path, before_commit: F) -> Outcome
    where
        S: Session + ?Sized,
        F: FnOnce(&mut S) -> Result<(), DbError>,
    {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        match ReportDocument::load(path) {
            Ok(doc) => self.process_report_with(session, &doc, name.as_deref(), before_commit),
            Err(e) => {
                let status = Status::classify(ErrorKind::from(&e));
                tracing::warn!(event = "report.unparseable", report = %path.display(), status = %status, error = %e);
                Outcome::failed(status, None)
            }
        }
    }

    /// Opens a dedicated session for one report file, processes it, and disconnects.
    pub fn register_file(&self, config: &DbConfig, path: &Path) -> Outcome {
        let mut store = match storage::connect(config) {
            Ok(s) => s,
            Err(e) => {
                let status = Status::classify(ErrorKind::Connection);
                tracing::error!(event = "db.connect_failed", status = %status, error = %e);
                return Outcome::failed(status, None);
            }
        };
        let outcome = self.process_path(&mut store, path);
        store.disconnect();
        outcome
    }
}

fn abort<S: Session + ?Sized>(session: &mut S, report: &str) {
    match session.rollback() {
        Ok(()) => tracing::debug!(event = "report.rollback", report),
        Err(e) => tracing::error!(event = "report.rollback_failed", report, error = %e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{FailPoint, MemoryStore};
    use serde_json::json;

    fn registrar(dedup: bool) -> Registrar {
        Registrar::new(ExtractionTemplate::builtin().unwrap(), RegistrationPolicy { dedup })
    }

    fn report(host: &str, cores: usize) -> ReportDocument {
        let rows: Vec<_> = (0..cores)
            .map(|c| json!({ "core": c, "samples": 1000, "min": 2, "max": 30 + c, "mean": 4.0 }))
            .collect();
        ReportDocument::new(json!({
            "SystemInfo": {
                "uname": { "node": host, "machine": "x86_64", "kernel": "6.6.0-rt15" },
                "cpu": { "cores": 8 },
                "dmi": { "manufacturer": "Dell", "product": "R740", "serial": format!("SN-{host}") }
            },
            "run": { "start": "2024-03-01T10:00:00Z", "duration": 600, "loads": ["hackbench"] },
            "cyclictest": { "cores": rows }
        }))
        .unwrap()
    }

    #[test]
    fn test_success_commits_everything() {
        let store = MemoryStore::new();
        let mut s = store.connect();
        let out = registrar(true).process_report(&mut s, &report("rt1", 3), Some("r.json"));
        assert_eq!(out.status, Status::Success);
        let run = out.run.unwrap();
        assert_eq!(store.system_count(), 1);
        assert_eq!(store.run_count(), 1);
        assert_eq!(store.cyclic_count_for(run), 3);
        assert_eq!(s.stats().commits, 1);
        assert_eq!(s.stats().rollback_calls, 0);
        assert!(!out.system.unwrap().reused);
    }

    #[test]
    fn test_unparseable_document_never_begins() {
        let store = MemoryStore::new();
        let mut s = store.connect();
        let doc = ReportDocument::new(json!({ "SystemInfo": {} })).unwrap();
        let out = registrar(true).process_report(&mut s, &doc, None);
        assert_eq!(out.status, Status::XmlParseFailed);
        assert_eq!(out.system, None);
        assert_eq!(s.stats().begins, 0);
        assert_eq!(s.stats().rollback_calls, 0);
    }

    #[test]
    fn test_missing_run_field_rolls_back_system() {
        let store = MemoryStore::new();
        let mut s = store.connect();
        let mut raw = report("rt1", 3).root().clone();
        raw["run"].as_object_mut().unwrap().remove("duration");
        let doc = ReportDocument::new(raw).unwrap();

        let out = registrar(true).process_report(&mut s, &doc, None);
        assert_eq!(out.status, Status::RunRegistrationFailed);
        assert!(out.system.is_some());
        assert_eq!(store.system_count(), 0);
        assert_eq!(store.run_count(), 0);
        assert_eq!(s.stats().rollbacks, 1);
        assert_eq!(s.stats().rollback_calls, 1);
    }

    #[test]
    fn test_each_step_failure_maps_to_its_status() {
        let cases = [
            (FailPoint::Begin, Status::GeneralDbError, 0),
            (FailPoint::FindSystem, Status::SystemRegistrationFailed, 1),
            (FailPoint::InsertSystem, Status::SystemRegistrationFailed, 1),
            (FailPoint::InsertRun, Status::RunRegistrationFailed, 1),
            (FailPoint::InsertCyclic(1), Status::CyclictestRegistrationFailed, 1),
            (FailPoint::DropCyclic(2), Status::CyclictestRegistrationFailed, 1),
            (FailPoint::Commit, Status::GeneralDbError, 1),
        ];
        for (point, expected, rollbacks) in cases {
            let store = MemoryStore::new();
            let mut s = store.connect().fail_at(point);
            let out = registrar(true).process_report(&mut s, &report("rt1", 3), None);
            assert_eq!(out.status, expected, "{point:?}");
            assert_eq!(s.stats().rollback_calls, rollbacks, "{point:?}");
            assert_eq!(store.system_count(), 0, "{point:?}");
            assert_eq!(store.run_count(), 0, "{point:?}");
            assert_eq!(store.cyclic_count(), 0, "{point:?}");
        }
    }

    #[test]
    fn test_failed_rollback_keeps_step_status() {
        let store = MemoryStore::new();
        let mut s = store.connect().fail_at(FailPoint::Rollback);
        let mut raw = report("rt1", 1).root().clone();
        raw["cyclictest"]["cores"] = json!([]);
        let doc = ReportDocument::new(raw).unwrap();
        let out = registrar(true).process_report(&mut s, &doc, None);
        assert_eq!(out.status, Status::CyclictestRegistrationFailed);
        assert_eq!(s.stats().rollback_calls, 1);
        assert_eq!(store.system_count(), 0);
    }

    #[test]
    fn test_before_commit_runs_inside_the_transaction() {
        let store = MemoryStore::new();
        let mut s = store.connect();
        let mut seen = None;
        let out = registrar(true).process_report_with(&mut s, &report("rt1", 2), None, |sess| {
            seen = Some(sess.in_transaction());
            Ok(())
        });
        assert_eq!(out.status, Status::Success);
        assert_eq!(seen, Some(true));
        assert_eq!(store.run_count(), 1);
    }

    #[test]
    fn test_before_commit_failure_rolls_back() {
        let store = MemoryStore::new();
        let mut s = store.connect();
        let out = registrar(true).process_report_with(&mut s, &report("rt1", 2), None, |_| {
            Err(DbError::Injected("mark_finished"))
        });
        assert_eq!(out.status, Status::GeneralDbError);
        assert_eq!(out.run, None);
        assert_eq!(s.stats().commits, 0);
        assert_eq!(s.stats().rollbacks, 1);
        assert_eq!(store.system_count(), 0);
        assert_eq!(store.cyclic_count(), 0);
    }

    #[test]
    fn test_dedup_reuses_committed_system() {
        let store = MemoryStore::new();
        let r = registrar(true);
        let first = r.process_report(&mut store.connect(), &report("rt1", 2), None);
        let second = r.process_report(&mut store.connect(), &report("rt1", 2), None);
        assert_eq!(second.status, Status::Success);
        assert_eq!(first.system_key(), second.system_key());
        assert!(second.system.unwrap().reused);
        assert_eq!(store.system_count(), 1);
        assert_eq!(store.runs_for(first.system_key().unwrap()).len(), 2);
    }

    #[test]
    fn test_dedup_disabled_inserts_again() {
        let store = MemoryStore::new();
        let r = registrar(false);
        let first = r.process_report(&mut store.connect(), &report("rt1", 1), None);
        let second = r.process_report(&mut store.connect(), &report("rt1", 1), None);
        assert_ne!(first.system_key(), second.system_key());
        assert_eq!(store.system_count(), 2);
    }

    #[test]
    fn test_steps_can_be_driven_individually() {
        let store = MemoryStore::new();
        let mut s = store.connect();
        let r = registrar(true);
        let doc = report("rt9", 2);
        s.begin().unwrap();
        let sys = r.register_system(&mut s, &doc).unwrap();
        let run = r.register_run(&mut s, &doc, sys, Some("report-9.json")).unwrap();
        assert_eq!(r.register_cyclictest(&mut s, &doc, run).unwrap(), 2);
        s.commit().unwrap();
        assert_eq!(store.cyclic_count_for(run), 2);
    }
}
