use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rteval-register",
    version,
    about = "Register rteval reports into the results database"
)]
pub struct Cli {
    #[arg(long, global = true, default_value = "rteval.yaml")]
    pub config: PathBuf,

    /// Database file; overrides the config and RTEVAL_DATABASE
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Reject unknown keys in the config and template
    #[arg(long, global = true)]
    pub strict: bool,

    /// tracing filter directive (e.g. "info", "rteval_core=debug")
    #[arg(long, global = true, env = "RTEVAL_LOG")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample config and create the database tables
    Init(InitArgs),
    /// Register report files directly
    Register(RegisterArgs),
    /// Work with the submission queue
    Queue(QueueArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InitArgs {
    /// Also write the built-in extraction template to this path
    #[arg(long)]
    pub template_out: Option<PathBuf>,

    /// Only write files; leave the database untouched
    #[arg(long)]
    pub no_schema: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RegisterArgs {
    /// Report documents (JSON or YAML)
    #[arg(required = true)]
    pub reports: Vec<PathBuf>,

    /// Concurrent registrations; defaults to `parallel` from the config
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Always insert a new system row
    #[arg(long)]
    pub no_dedup: bool,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Clone)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub cmd: QueueSub,
}

#[derive(Subcommand, Clone)]
pub enum QueueSub {
    /// Add report files to the queue as NEW
    Submit(QueueSubmitArgs),
    /// Process NEW submissions
    Drain(QueueDrainArgs),
    /// Reset a submission to NEW
    Requeue(QueueRequeueArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct QueueSubmitArgs {
    #[arg(required = true)]
    pub files: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct QueueDrainArgs {
    #[arg(long, default_value_t = 100)]
    pub limit: u32,

    /// Directory that relative queued filenames are resolved against
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    #[arg(long)]
    pub parallel: Option<usize>,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct QueueRequeueArgs {
    pub submid: i64,
}
