use super::args::*;
use rteval_core::config::{load_config, write_sample_config, AppConfig};
use rteval_core::errors::ConfigError;
use rteval_core::model::Outcome;
use rteval_core::{Disposition, Status, Store};
use serde::Serialize;
use std::path::Path;

pub mod queue;
pub mod register;

pub mod exit_codes {
    pub const OK: i32 = 0;
    /// At least one report was rejected or needs an operator.
    pub const REPORT_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    /// Only retryable database failures occurred.
    pub const RETRY: i32 = 3;
}

pub struct Globals {
    pub config: std::path::PathBuf,
    pub db: Option<String>,
    pub strict: bool,
    /// The config file as parsed at startup, if it existed then.
    pub preloaded: Option<Result<AppConfig, ConfigError>>,
}

pub async fn dispatch(
    cli: Cli,
    preloaded: Option<Result<AppConfig, ConfigError>>,
) -> anyhow::Result<i32> {
    let globals = Globals {
        config: cli.config,
        db: cli.db,
        strict: cli.strict,
        preloaded,
    };
    match cli.cmd {
        Command::Init(args) => cmd_init(&globals, args),
        Command::Register(args) => register::run(&globals, args).await,
        Command::Queue(args) => match args.cmd {
            QueueSub::Submit(a) => queue::cmd_submit(&globals, a),
            QueueSub::Drain(a) => queue::cmd_drain(&globals, a).await,
            QueueSub::Requeue(a) => queue::cmd_requeue(&globals, a),
        },
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

/// Config file, then RTEVAL_* environment, then `--db`.
pub fn load_app_config(g: &Globals) -> anyhow::Result<AppConfig> {
    let mut cfg = if let Some(pre) = &g.preloaded {
        pre.clone()?
    } else if g.config.exists() {
        // Written after startup, by `init`.
        load_config(&g.config, g.strict)?
    } else if g.db.is_some() {
        AppConfig::default()
    } else {
        anyhow::bail!(
            "config error: {} not found (run `rteval-register init` or pass --db)",
            g.config.display()
        );
    };
    cfg.apply_env();
    if let Some(db) = &g.db {
        cfg.database.set("database", db.as_str());
    }
    Ok(cfg)
}

fn cmd_init(g: &Globals, args: InitArgs) -> anyhow::Result<i32> {
    if g.config.exists() {
        eprintln!("note: {} already exists", g.config.display());
    } else {
        if let Some(parent) = g.config.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        write_sample_config(&g.config)?;
        eprintln!("created {}", g.config.display());
    }

    if let Some(path) = &args.template_out {
        write_file_if_missing(path, rteval_core::extract::template::DEFAULT_TEMPLATE)?;
    }

    if args.no_schema {
        return Ok(exit_codes::OK);
    }

    let cfg = load_app_config(g)?;
    let store = Store::connect(&cfg.database)?;
    store.init_schema()?;
    eprintln!("initialized schema in {}", store.database());
    Ok(exit_codes::OK)
}

fn write_file_if_missing(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::write(path, content)?;
        eprintln!("created {}", path.display());
    } else {
        eprintln!("note: {} already exists (skipped)", path.display());
    }
    Ok(())
}

/// One line of command output per processed report.
#[derive(Debug, Serialize)]
pub struct ReportLine {
    pub report: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submid: Option<i64>,
    pub status: Status,
    pub code: i32,
    pub disposition: Disposition,
    /// Only keys that exist after the report: committed ones, or reused rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syskey: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rterid: Option<i64>,
}

impl ReportLine {
    pub fn new(report: String, submid: Option<i64>, outcome: &Outcome) -> Self {
        Self {
            report,
            submid,
            status: outcome.status,
            code: outcome.status.code(),
            disposition: outcome.status.disposition(),
            syskey: outcome
                .system
                .filter(|s| outcome.status.is_success() || s.reused)
                .map(|s| s.key.0),
            reused: outcome.system.is_some_and(|s| s.reused),
            rterid: outcome.run.map(|k| k.0),
        }
    }
}

pub fn print_lines(lines: &[ReportLine], format: &str) -> anyhow::Result<()> {
    for line in lines {
        if format == "json" {
            println!("{}", serde_json::to_string(line)?);
        } else {
            let mut out = format!("{}\t{}", line.report, line.status);
            if let Some(k) = line.syskey {
                out.push_str(&format!("\tsyskey={}", k));
                if line.reused {
                    out.push_str(" (reused)");
                }
            }
            if let Some(k) = line.rterid {
                out.push_str(&format!("\trterid={}", k));
            }
            println!("{}", out);
        }
    }
    Ok(())
}

/// Rejections and operator cases win over retryable failures.
pub fn exit_code_for(statuses: impl IntoIterator<Item = Status>) -> i32 {
    let mut code = exit_codes::OK;
    for s in statuses {
        match s.disposition() {
            Disposition::Reject | Disposition::NotifyOperator => return exit_codes::REPORT_FAILED,
            Disposition::Retry | Disposition::Pending => code = exit_codes::RETRY,
            Disposition::Done => {}
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use rteval_core::model::{RunKey, SystemKey, SystemRegistration};

    #[test]
    fn test_exit_code_precedence() {
        assert_eq!(exit_code_for([Status::Success, Status::Success]), exit_codes::OK);
        assert_eq!(exit_code_for([Status::Success, Status::GeneralDbError]), exit_codes::RETRY);
        assert_eq!(
            exit_code_for([Status::GeneralDbError, Status::XmlParseFailed]),
            exit_codes::REPORT_FAILED
        );
        assert_eq!(exit_code_for(Vec::new()), exit_codes::OK);
    }

    #[test]
    fn test_rolled_back_system_key_not_reported() {
        let fresh = SystemRegistration {
            key: SystemKey(7),
            reused: false,
        };
        let failed = Outcome::failed(Status::RunRegistrationFailed, Some(fresh));
        let line = ReportLine::new("a.json".into(), None, &failed);
        assert_eq!(line.syskey, None);
        assert!(!serde_json::to_string(&line).unwrap().contains("syskey"));

        let reused = SystemRegistration {
            key: SystemKey(3),
            reused: true,
        };
        let line = ReportLine::new(
            "b.json".into(),
            None,
            &Outcome::failed(Status::CyclictestRegistrationFailed, Some(reused)),
        );
        assert_eq!(line.syskey, Some(3));
        assert!(line.reused);

        let ok = Outcome {
            status: Status::Success,
            system: Some(fresh),
            run: Some(RunKey(1)),
        };
        let line = ReportLine::new("c.json".into(), None, &ok);
        assert_eq!((line.syskey, line.rterid, line.reused), (Some(7), Some(1), false));
    }
}
