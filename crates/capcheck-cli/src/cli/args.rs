use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "capcheck",
    version,
    about = "Checks that a server's BMC actually enforces the power caps it is given"
)]
pub struct Cli {
    /// tracing filter, e.g. `info` or `capcheck_core=debug`
    #[arg(long, global = true, env = "CAPCHECK_LOG", default_value = "info")]
    pub log_level: String,

    /// text | json
    #[arg(long, global = true, default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full (load, cap) campaign against the system under test
    Run(RunArgs),
    /// Summarize a run stored in a results database
    Summary(SummaryArgs),
    /// Write a sample config file
    Init(InitArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "capcheck.yaml")]
    pub config: PathBuf,

    /// Results database. Defaults to `db_path` from the config, then to
    /// `<agent-host>_<YYYYmmdd_HHMM>_capping_test.db`.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Unknown config keys are errors instead of warnings
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone)]
pub struct SummaryArgs {
    #[arg(long)]
    pub db: PathBuf,

    /// Run id; the latest run when omitted
    #[arg(long)]
    pub run: Option<i64>,

    /// Count BMC samples at or above cap * (1 + pct/100)
    #[arg(long, default_value_t = 5.0)]
    pub threshold_pct: f64,

    /// text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "capcheck.yaml")]
    pub config: PathBuf,
}
