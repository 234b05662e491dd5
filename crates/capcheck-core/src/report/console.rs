use crate::engine::CampaignReport;
use crate::model::{TestRunRow, TrialStatus};
use crate::storage::summary::RunSummary;

pub fn print_campaign(report: &CampaignReport) {
    eprintln!("\nRun #{} ({} trials)", report.run_id, report.trials.len());

    for t in &report.trials {
        match &t.error {
            None => eprintln!(
                "✅ load {:>3}%  cap {:>5} W",
                t.trial.load_percent, t.trial.cap_watts
            ),
            Some(msg) => eprintln!(
                "❌ load {:>3}%  cap {:>5} W  INVALID: {}",
                t.trial.load_percent, t.trial.cap_watts, msg
            ),
        }
    }

    let elapsed = report.finished_at - report.started_at;
    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!(
        "Status: {}  ({:.1} min)",
        report.status.as_str(),
        elapsed.num_milliseconds() as f64 / 60_000.0
    );
    eprintln!(
        "Trials: {} valid, {} invalid",
        report.trials.len() - report.invalid_trials(),
        report.invalid_trials()
    );
    eprintln!(
        "Samples: {} bmc, {} rapl ({} bmc / {} rapl polls failed)",
        report.collector.bmc_samples,
        report.collector.rapl_samples,
        report.collector.bmc_failures,
        report.collector.rapl_failures
    );
}

pub fn print_summary(summary: &RunSummary, tests: &[TestRunRow]) {
    eprintln!("\nRun #{} [{}]", summary.run_id, summary.status);

    for t in tests {
        let end = t
            .end_ts
            .map(|e| format!("{:.1}s", (e - t.start_ts).num_milliseconds() as f64 / 1000.0))
            .unwrap_or_else(|| "-".into());
        match t.status {
            TrialStatus::Complete => eprintln!(
                "✅ #{:<5} load {:>3}%  cap {:>5} W  {}",
                t.id, t.load_percent, t.cap_level, end
            ),
            TrialStatus::Running => eprintln!(
                "⏸️  #{:<5} load {:>3}%  cap {:>5} W  (never finished)",
                t.id, t.load_percent, t.cap_level
            ),
            TrialStatus::Invalid => {
                eprintln!(
                    "❌ #{:<5} load {:>3}%  cap {:>5} W  INVALID",
                    t.id, t.load_percent, t.cap_level
                );
                if let Some(err) = &t.error {
                    eprintln!("      → {}", err);
                }
            }
        }
    }

    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!(
        "Summary: {} complete, {} invalid, {} bmc samples, {} rapl samples, {} commands",
        summary.trials_complete,
        summary.trials_invalid,
        summary.bmc_samples,
        summary.rapl_samples,
        summary.capping_commands
    );
    eprintln!(
        "Over cap: {} samples, {} at or above +{:.0}%",
        summary.samples_over_cap, summary.samples_over_threshold, summary.threshold_pct
    );
}
