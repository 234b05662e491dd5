use assert_cmd::Command;
use capcheck_core::clock::parse_ts;
use capcheck_core::model::{BmcSample, RunStatus};
use capcheck_core::storage::Store;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_init_writes_loadable_sample_config() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("conf/capcheck.yaml");

    Command::cargo_bin("capcheck")?
        .args(["init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("created"));

    let cfg = capcheck_core::config::load_config(&path, true)?;
    assert_eq!(cfg.campaign.cap_min, 340);

    // second init leaves the file alone
    Command::cargo_bin("capcheck")?
        .args(["init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
    Ok(())
}

#[test]
fn test_run_with_bad_config_is_fatal() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("capcheck.yaml");
    std::fs::write(
        &path,
        "bmc: {kind: ipmi, hostname: bmc01}\nagent: {url: sut01}\ncampaign: {min_load: 90, max_load: 10, load_delta: 5, cap_min: 300, cap_max: 400, cap_delta: 100}\n",
    )?;

    Command::cargo_bin("capcheck")?
        .args(["run", "--config"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("min_load"));
    Ok(())
}

#[test]
fn test_summary_of_missing_db_is_fatal() -> anyhow::Result<()> {
    let dir = tempdir()?;
    Command::cargo_bin("capcheck")?
        .args(["summary", "--db"])
        .arg(dir.path().join("nope.db"))
        .assert()
        .code(2);
    Ok(())
}

#[test]
fn test_summary_json() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("capping.db");
    let ts = |s: &str| parse_ts(s).unwrap();
    {
        let store = Store::open(&db)?;
        store.init_schema()?;
        let run = store.create_run(&ts("2024-05-01T10:00:00Z"), &serde_json::json!({}))?;
        let t = store.begin_test(run, 50, 400, &ts("2024-05-01T10:00:01Z"))?;
        store.insert_tick(
            run,
            Some(&BmcSample {
                timestamp: ts("2024-05-01T10:00:02Z"),
                power_watts: 430.0,
                cap_level: Some(400.0),
            }),
            &[],
        )?;
        store.complete_test(t, &ts("2024-05-01T10:00:03Z"))?;
        store.finalize_run(run, &ts("2024-05-01T10:00:04Z"), RunStatus::Completed)?;
        store.close()?;
    }

    let out = Command::cargo_bin("capcheck")?
        .args(["summary", "--format", "json", "--threshold-pct", "5", "--db"])
        .arg(&db)
        .output()?;
    assert!(out.status.success());

    let v: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(v["summary"]["trials_complete"], 1);
    assert_eq!(v["summary"]["samples_over_cap"], 1);
    assert_eq!(v["summary"]["samples_over_threshold"], 1);
    assert_eq!(v["tests"][0]["status"], "complete");
    Ok(())
}
