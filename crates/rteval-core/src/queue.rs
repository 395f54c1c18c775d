//! Submission queue processing.
//!
//! A stored report and its SUCCESS status commit together, so a registered
//! submission never stays NEW. Failure statuses are written afterwards,
//! autocommitted; if that write fails the submission stays NEW and the next
//! drain retries a report that was not stored.

use crate::errors::DbError;
use crate::model::{Outcome, Submission};
use crate::registrar::Registrar;
use crate::status::Status;
use crate::storage::Store;
use std::path::{Path, PathBuf};

/// Resolves a queued filename; relative names live under `report_dir`.
pub fn report_path(submission: &Submission, report_dir: Option<&Path>) -> PathBuf {
    let p = PathBuf::from(&submission.filename);
    match report_dir {
        Some(dir) if p.is_relative() => dir.join(p),
        _ => p,
    }
}

/// Runs one queued report and records its final status.
///
/// Errors only when the submission could not be marked as started; nothing
/// was registered in that case.
pub fn process_submission(
    store: &mut Store,
    registrar: &Registrar,
    submission: &Submission,
    report_dir: Option<&Path>,
) -> Result<Outcome, DbError> {
    let submid = submission.submid;
    store.mark_started(submid)?;
    let path = report_path(submission, report_dir);
    let outcome = registrar.process_path_with(store, &path, |tx: &mut Store| {
        tx.mark_finished(submid, Status::Success)
    });

    if !outcome.status.is_success() {
        if let Err(e) = store.mark_finished(submid, outcome.status) {
            tracing::warn!(
                event = "submission.status_not_recorded",
                submid,
                status = %outcome.status,
                error = %e,
            );
        }
    }

    tracing::info!(
        event = "submission.processed",
        submid,
        file = %submission.filename,
        status = %outcome.status,
        disposition = ?outcome.status.disposition(),
    );
    Ok(outcome)
}

/// Processes up to `limit` NEW submissions sequentially on one session.
///
/// A submission that cannot be started is reported as `GENERAL_DB_ERROR`
/// and the drain moves on.
pub fn drain(
    store: &mut Store,
    registrar: &Registrar,
    limit: u32,
    report_dir: Option<&Path>,
) -> Result<Vec<(Submission, Outcome)>, DbError> {
    let pending = store.pending(limit)?;
    let mut done = Vec::with_capacity(pending.len());
    for sub in pending {
        let outcome = match process_submission(store, registrar, &sub, report_dir) {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(event = "submission.failed", submid = sub.submid, error = %e);
                Outcome::failed(Status::GeneralDbError, None)
            }
        };
        done.push((sub, outcome));
    }
    Ok(done)
}
