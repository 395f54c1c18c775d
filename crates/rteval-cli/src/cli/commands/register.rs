use super::{exit_code_for, load_app_config, print_lines, Globals, ReportLine};
use crate::cli::args::RegisterArgs;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub async fn run(g: &Globals, args: RegisterArgs) -> anyhow::Result<i32> {
    let mut cfg = load_app_config(g)?;
    if args.no_dedup {
        cfg.dedup = false;
    }
    let registrar = cfg.registrar(g.strict)?;
    let db = Arc::new(cfg.database.clone());

    let parallel = args.parallel.unwrap_or(cfg.parallel).max(1);
    let sem = Arc::new(Semaphore::new(parallel));
    tracing::info!(event = "register.start", reports = args.reports.len(), parallel, dedup = cfg.dedup);

    let mut handles = Vec::with_capacity(args.reports.len());
    for path in args.reports {
        let permit = sem.clone().acquire_owned().await?;
        let registrar = registrar.clone();
        let db = Arc::clone(&db);
        // One session per report.
        let h = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let outcome = registrar.register_file(&db, &path);
            (path, outcome)
        });
        handles.push(h);
    }

    let mut lines = Vec::with_capacity(handles.len());
    for h in handles {
        let (path, outcome) = h.await?;
        lines.push(ReportLine::new(path.display().to_string(), None, &outcome));
    }

    print_lines(&lines, &args.format)?;
    Ok(exit_code_for(lines.iter().map(|l| l.status)))
}
