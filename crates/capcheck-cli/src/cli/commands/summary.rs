use super::exit_codes;
use crate::cli::args::SummaryArgs;
use capcheck_core::storage::Store;

pub fn cmd_summary(args: SummaryArgs) -> anyhow::Result<i32> {
    if !args.db.exists() {
        eprintln!("config error: database {} not found", args.db.display());
        return Ok(exit_codes::FATAL);
    }
    let store = Store::open(&args.db)?;
    store.init_schema()?;

    let run_id = match args.run {
        Some(id) => id,
        None => match store.latest_run_id()? {
            Some(id) => id,
            None => {
                eprintln!("no runs recorded in {}", args.db.display());
                return Ok(exit_codes::FATAL);
            }
        },
    };

    let summary = store.run_summary(run_id, args.threshold_pct)?;
    let tests = store.tests_for_run(run_id)?;

    if args.format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "summary": summary,
                "tests": tests,
            }))?
        );
    } else {
        capcheck_core::report::console::print_summary(&summary, &tests);
    }

    Ok(exit_codes::OK)
}
