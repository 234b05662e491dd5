//! Read-side queries over a finished (or running) campaign.
//!
//! Samples are never linked to trials by key; a sample belongs to a trial
//! when its timestamp falls inside the trial's `[start_ts, end_ts]` window.

use crate::errors::StoreError;
use crate::model::{BmcSample, RaplSample};
use crate::storage::store::ts_column;
use crate::storage::Store;
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub status: String,
    pub trials_complete: u64,
    pub trials_invalid: u64,
    pub bmc_samples: u64,
    pub rapl_samples: u64,
    pub capping_commands: u64,
    /// BMC samples where power exceeded the reported cap.
    pub samples_over_cap: u64,
    /// BMC samples at or above `cap * (1 + threshold_pct / 100)`.
    pub samples_over_threshold: u64,
    pub threshold_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrialSamples {
    pub bmc: Vec<BmcSample>,
    pub rapl: Vec<RaplSample>,
}

impl Store {
    pub fn run_summary(&self, run_id: i64, threshold_pct: f64) -> Result<RunSummary, StoreError> {
        let conn = self.lock()?;
        let status: String =
            conn.query_row("SELECT status FROM runs WHERE id = ?1", params![run_id], |r| {
                r.get(0)
            })?;

        let count = |sql: &str| -> Result<u64, StoreError> {
            let n: i64 = conn.query_row(sql, params![run_id], |r| r.get(0))?;
            Ok(n.max(0) as u64)
        };

        let ratio = 1.0 + threshold_pct / 100.0;
        let over_threshold: i64 = conn.query_row(
            "SELECT count(*) FROM bmc
             WHERE run_id = ?1 AND cap_level IS NOT NULL AND cap_level > 0
               AND power_watts / cap_level >= ?2",
            params![run_id, ratio],
            |r| r.get(0),
        )?;

        Ok(RunSummary {
            run_id,
            status,
            trials_complete: count(
                "SELECT count(*) FROM tests WHERE run_id = ?1 AND status = 'complete'",
            )?,
            trials_invalid: count(
                "SELECT count(*) FROM tests WHERE run_id = ?1 AND status <> 'complete'",
            )?,
            bmc_samples: count("SELECT count(*) FROM bmc WHERE run_id = ?1")?,
            rapl_samples: count("SELECT count(*) FROM rapl WHERE run_id = ?1")?,
            capping_commands: count("SELECT count(*) FROM capping_commands WHERE run_id = ?1")?,
            samples_over_cap: count(
                "SELECT count(*) FROM bmc
                 WHERE run_id = ?1 AND cap_level IS NOT NULL AND power_watts > cap_level",
            )?,
            samples_over_threshold: over_threshold.max(0) as u64,
            threshold_pct,
        })
    }

    /// Samples inside a trial's window. Invalid trials have no window and
    /// yield nothing.
    pub fn samples_for_trial(&self, test_id: i64) -> Result<TrialSamples, StoreError> {
        let conn = self.lock()?;

        let mut bmc_stmt = conn.prepare(
            "SELECT b.timestamp, b.power_watts, b.cap_level
             FROM bmc b JOIN tests t
               ON b.run_id = t.run_id AND b.timestamp BETWEEN t.start_ts AND t.end_ts
             WHERE t.id = ?1 AND t.end_ts IS NOT NULL
             ORDER BY b.timestamp, b.id",
        )?;
        let bmc_rows = bmc_stmt.query_map(params![test_id], |row| {
            let ts: String = row.get(0)?;
            Ok(BmcSample {
                timestamp: ts_column(0, &ts)?,
                power_watts: row.get(1)?,
                cap_level: row.get(2)?,
            })
        })?;
        let mut bmc = Vec::new();
        for r in bmc_rows {
            bmc.push(r?);
        }

        let mut rapl_stmt = conn.prepare(
            "SELECT r.timestamp, r.package_id, r.power_watts
             FROM rapl r JOIN tests t
               ON r.run_id = t.run_id AND r.timestamp BETWEEN t.start_ts AND t.end_ts
             WHERE t.id = ?1 AND t.end_ts IS NOT NULL
             ORDER BY r.timestamp, r.id",
        )?;
        let rapl_rows = rapl_stmt.query_map(params![test_id], |row| {
            let ts: String = row.get(0)?;
            Ok(RaplSample {
                timestamp: ts_column(0, &ts)?,
                package_id: row.get(1)?,
                power_watts: row.get(2)?,
            })
        })?;
        let mut rapl = Vec::new();
        for r in rapl_rows {
            rapl.push(r?);
        }

        Ok(TrialSamples { bmc, rapl })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_ts;
    use chrono::{DateTime, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    fn bmc(at: &str, power: f64, cap: Option<f64>) -> BmcSample {
        BmcSample {
            timestamp: ts(at),
            power_watts: power,
            cap_level: cap,
        }
    }

    #[test]
    fn test_summary_counts_cap_excursions() -> anyhow::Result<()> {
        let store = Store::memory()?;
        store.init_schema()?;
        let run = store.create_run(&ts("2024-05-01T10:00:00Z"), &serde_json::json!({}))?;

        store.insert_tick(run, Some(&bmc("2024-05-01T10:00:01Z", 390.0, Some(400.0))), &[])?;
        store.insert_tick(run, Some(&bmc("2024-05-01T10:00:02Z", 420.0, Some(400.0))), &[])?;
        store.insert_tick(run, Some(&bmc("2024-05-01T10:00:03Z", 460.0, Some(400.0))), &[])?;
        store.insert_tick(run, Some(&bmc("2024-05-01T10:00:04Z", 900.0, None)), &[])?;

        let s = store.run_summary(run, 10.0)?;
        assert_eq!(s.bmc_samples, 4);
        assert_eq!(s.samples_over_cap, 2);
        assert_eq!(s.samples_over_threshold, 1);
        assert_eq!(s.status, "running");
        Ok(())
    }

    #[test]
    fn test_samples_attributed_by_window() -> anyhow::Result<()> {
        let store = Store::memory()?;
        store.init_schema()?;
        let run = store.create_run(&ts("2024-05-01T10:00:00Z"), &serde_json::json!({}))?;

        let t1 = store.begin_test(run, 50, 400, &ts("2024-05-01T10:00:10Z"))?;
        store.complete_test(t1, &ts("2024-05-01T10:00:20Z"))?;
        let t2 = store.begin_test(run, 50, 500, &ts("2024-05-01T10:00:30Z"))?;
        store.invalidate_test(t2, "activate_capping failed")?;

        for at in [
            "2024-05-01T10:00:05Z",
            "2024-05-01T10:00:12Z",
            "2024-05-01T10:00:19Z",
            "2024-05-01T10:00:32Z",
        ] {
            let rapl = RaplSample {
                timestamp: ts(at),
                package_id: "package-0".into(),
                power_watts: 120.0,
            };
            store.insert_tick(run, Some(&bmc(at, 380.0, Some(400.0))), &[rapl])?;
        }

        let in_t1 = store.samples_for_trial(t1)?;
        assert_eq!(in_t1.bmc.len(), 2);
        assert_eq!(in_t1.rapl.len(), 2);
        assert!(store.samples_for_trial(t2)?.bmc.is_empty());
        Ok(())
    }

    #[test]
    fn test_window_ignores_other_runs_samples() -> anyhow::Result<()> {
        let store = Store::memory()?;
        store.init_schema()?;
        let first = store.create_run(&ts("2024-05-01T10:00:00Z"), &serde_json::json!({}))?;
        let second = store.create_run(&ts("2024-05-01T10:00:00Z"), &serde_json::json!({}))?;

        let t = store.begin_test(first, 50, 400, &ts("2024-05-01T10:00:10Z"))?;
        store.complete_test(t, &ts("2024-05-01T10:00:20Z"))?;

        // same instant, different runs
        let at = "2024-05-01T10:00:15Z";
        let rapl = |pkg: &str| RaplSample {
            timestamp: ts(at),
            package_id: pkg.into(),
            power_watts: 120.0,
        };
        store.insert_tick(first, Some(&bmc(at, 380.0, Some(400.0))), &[rapl("package-0")])?;
        store.insert_tick(second, Some(&bmc(at, 999.0, None)), &[rapl("package-9")])?;

        let window = store.samples_for_trial(t)?;
        assert_eq!(window.bmc.len(), 1);
        assert_eq!(window.bmc[0].power_watts, 380.0);
        assert_eq!(window.rapl.len(), 1);
        assert_eq!(window.rapl[0].package_id, "package-0");
        Ok(())
    }

    #[test]
    fn test_unparseable_sample_timestamp_is_an_error() -> anyhow::Result<()> {
        let store = Store::memory()?;
        store.init_schema()?;
        let run = store.create_run(&ts("2024-05-01T10:00:00Z"), &serde_json::json!({}))?;
        // sorts inside the window but is not RFC 3339
        store.lock()?.execute(
            "INSERT INTO bmc(run_id, timestamp, power_watts) VALUES (?1, '2024-05-01T10:00:15 local', 1.0)",
            [run],
        )?;
        let t = store.begin_test(run, 50, 400, &ts("2024-05-01T10:00:10Z"))?;
        store.complete_test(t, &ts("2024-05-01T10:00:20Z"))?;

        assert!(matches!(
            store.samples_for_trial(t),
            Err(StoreError::Database(rusqlite::Error::FromSqlConversionFailure(..)))
        ));
        Ok(())
    }
}
