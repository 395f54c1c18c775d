use super::{exit_code_for, exit_codes, load_app_config, print_lines, Globals, ReportLine};
use crate::cli::args::{QueueDrainArgs, QueueRequeueArgs, QueueSubmitArgs};
use rteval_core::model::Outcome;
use rteval_core::{Status, Store};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub fn cmd_submit(g: &Globals, args: QueueSubmitArgs) -> anyhow::Result<i32> {
    let cfg = load_app_config(g)?;
    let store = Store::connect(&cfg.database)?;
    for file in &args.files {
        let submid = store.enqueue(file)?;
        tracing::info!(event = "submission.queued", submid, file = %file);
        println!("{}\t{}", submid, file);
    }
    Ok(exit_codes::OK)
}

pub fn cmd_requeue(g: &Globals, args: QueueRequeueArgs) -> anyhow::Result<i32> {
    let cfg = load_app_config(g)?;
    let store = Store::connect(&cfg.database)?;
    if store.requeue(args.submid)? {
        println!("{}\t{}", args.submid, Status::New);
        Ok(exit_codes::OK)
    } else {
        eprintln!("error: unknown submission {}", args.submid);
        Ok(exit_codes::REPORT_FAILED)
    }
}

pub async fn cmd_drain(g: &Globals, args: QueueDrainArgs) -> anyhow::Result<i32> {
    let cfg = load_app_config(g)?;
    let registrar = cfg.registrar(g.strict)?;
    let db = Arc::new(cfg.database.clone());

    let pending = Store::connect(&db)?.pending(args.limit)?;
    if pending.is_empty() {
        eprintln!("queue is empty");
        return Ok(exit_codes::OK);
    }

    let parallel = args.parallel.unwrap_or(cfg.parallel).max(1);
    let sem = Arc::new(Semaphore::new(parallel));
    tracing::info!(event = "queue.drain", submissions = pending.len(), parallel);

    let mut handles = Vec::with_capacity(pending.len());
    for sub in pending {
        let permit = sem.clone().acquire_owned().await?;
        let registrar = registrar.clone();
        let db = Arc::clone(&db);
        let report_dir = args.report_dir.clone();
        let h = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = Store::connect(&db)
                .map_err(anyhow::Error::from)
                .and_then(|mut store| {
                    rteval_core::queue::process_submission(
                        &mut store,
                        &registrar,
                        &sub,
                        report_dir.as_deref(),
                    )
                    .map_err(anyhow::Error::from)
                });
            let outcome = result.unwrap_or_else(|e| {
                // Nothing was registered; the submission stays NEW.
                tracing::error!(event = "submission.failed", submid = sub.submid, error = %e);
                Outcome::failed(Status::GeneralDbError, None)
            });
            (sub, outcome)
        });
        handles.push(h);
    }

    let mut lines = Vec::with_capacity(handles.len());
    for h in handles {
        let (sub, outcome) = h.await?;
        lines.push(ReportLine::new(sub.filename, Some(sub.submid), &outcome));
    }

    print_lines(&lines, &args.format)?;
    Ok(exit_code_for(lines.iter().map(|l| l.status)))
}
