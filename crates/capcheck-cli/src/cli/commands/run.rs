use super::exit_codes;
use super::ensure_parent_dir;
use crate::cli::args::RunArgs;
use anyhow::Context;
use capcheck_core::agent::HttpAgentClient;
use capcheck_core::config::load_config;
use capcheck_core::engine::Sequencer;
use capcheck_core::model::RunStatus;
use capcheck_core::storage::Store;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;

pub async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::FATAL);
        }
    };

    let db = args
        .db
        .clone()
        .or_else(|| cfg.db_path.clone())
        .unwrap_or_else(|| default_db_path(&cfg.agent.url, Local::now()));
    ensure_parent_dir(&db)?;

    let store =
        Store::open(&db).with_context(|| format!("failed to open database {}", db.display()))?;
    store.init_schema()?;
    tracing::info!(event = "db.open", path = %db.display());

    let bmc = capcheck_core::bmc::from_config(&cfg.bmc)?;
    let agent = Arc::new(HttpAgentClient::new(&cfg.agent)?);
    let seq = Sequencer::new(store.clone(), bmc, agent, &cfg);

    let cancel = seq.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(
                event = "run.interrupt",
                "interrupt received, stopping after the current step"
            );
            cancel.cancel();
        }
    });

    let result = seq.run(&cfg).await;
    drop(seq);
    if let Err(e) = store.close() {
        tracing::warn!(event = "db.close_failed", error = %e);
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("fatal: {:#}", e);
            return Ok(exit_codes::FATAL);
        }
    };

    capcheck_core::report::console::print_campaign(&report);
    eprintln!("results: {}", db.display());

    if report.status == RunStatus::Aborted || report.invalid_trials() > 0 {
        return Ok(exit_codes::TRIAL_INVALID);
    }
    Ok(exit_codes::OK)
}

/// `<agent-host>_<YYYYmmdd_HHMM>_capping_test.db`
fn default_db_path(agent_url: &str, now: DateTime<Local>) -> PathBuf {
    let without_scheme = agent_url
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host = without_scheme
        .split(['/', ':'])
        .next()
        .filter(|h| !h.is_empty())
        .unwrap_or("agent");
    PathBuf::from(format!(
        "{}_{}_capping_test.db",
        host,
        now.format("%Y%m%d_%H%M")
    ))
}
