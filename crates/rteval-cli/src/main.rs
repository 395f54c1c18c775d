use clap::Parser;
use rteval_core::config::parse_config;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use cli::args::Cli;
use cli::commands::{dispatch, exit_codes};

/// Logs go to stderr; stdout carries command output only.
fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();

    // Parsed once, before logging exists; unknown keys are reported afterwards.
    let loaded = cli
        .config
        .exists()
        .then(|| parse_config(&cli.config, cli.strict));
    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            loaded
                .as_ref()
                .and_then(|r| r.as_ref().ok())
                .map(|l| l.config.log_level.clone())
        })
        .unwrap_or_else(|| "warn".into());
    init_logging(&level, cli.log_json);
    if let Some(Ok(l)) = &loaded {
        l.warn_unknown(&cli.config);
    }

    let preloaded = loaded.map(|r| r.map(|l| l.config));
    let code = match dispatch(cli, preloaded).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            exit_codes::CONFIG_ERROR
        }
    };
    std::process::exit(code);
}
