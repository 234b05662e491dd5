use super::args::*;

pub mod run;
pub mod summary;

pub mod exit_codes {
    pub const OK: i32 = 0;
    /// The run finished, but not every trial is valid.
    pub const TRIAL_INVALID: i32 = 1;
    pub const FATAL: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::cmd_run(args).await,
        Command::Summary(args) => summary::cmd_summary(args),
        Command::Init(args) => cmd_init(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() {
        eprintln!("note: {} already exists", args.config.display());
        return Ok(exit_codes::OK);
    }
    ensure_parent_dir(&args.config)?;
    capcheck_core::config::write_sample_config(&args.config).map_err(|e| anyhow::anyhow!(e))?;
    eprintln!("created {}", args.config.display());
    Ok(exit_codes::OK)
}

pub(crate) fn ensure_parent_dir(path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
