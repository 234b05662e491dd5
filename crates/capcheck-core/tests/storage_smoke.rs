use capcheck_core::clock::parse_ts;
use capcheck_core::model::{BmcSample, RaplSample, RunStatus, SystemInfo, TrialStatus};
use capcheck_core::storage::Store;
use chrono::{DateTime, Utc};
use tempfile::tempdir;

fn ts(s: &str) -> DateTime<Utc> {
    parse_ts(s).unwrap()
}

fn one_session(store: &Store, hostname: &str, base: &str) -> anyhow::Result<i64> {
    let run = store.create_run(&ts(&format!("{}:00.000000Z", base)), &serde_json::json!({}))?;
    let t = store.begin_test(run, 50, 400, &ts(&format!("{}:01.000000Z", base)))?;
    store.insert_tick(
        run,
        Some(&BmcSample {
            timestamp: ts(&format!("{}:02.000000Z", base)),
            power_watts: 380.0,
            cap_level: Some(400.0),
        }),
        &[RaplSample {
            timestamp: ts(&format!("{}:02.000000Z", base)),
            package_id: "package-0".into(),
            power_watts: 150.0,
        }],
    )?;
    store.complete_test(t, &ts(&format!("{}:03.000000Z", base)))?;
    store.upsert_system_info(
        &SystemInfo {
            hostname: hostname.into(),
            ..Default::default()
        },
        "ipmi",
        &ts(&format!("{}:00.000000Z", base)),
    )?;
    store.finalize_run(run, &ts(&format!("{}:04.000000Z", base)), RunStatus::Completed)?;
    Ok(run)
}

#[test]
fn test_storage_smoke_lifecycle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("capping.db");

    // 1. First session
    let store = Store::open(&db_path)?;
    store.init_schema()?;
    let first = one_session(&store, "sut-a", "2024-05-01T10:00")?;
    store.close()?;

    // 2. Reopen and append a second session
    let store = Store::open(&db_path)?;
    store.init_schema()?;
    let second = one_session(&store, "sut-b", "2024-05-01T11:00")?;
    assert_ne!(first, second);
    assert_eq!(store.latest_run_id()?, Some(second));

    // 3. First session untouched
    let tests = store.tests_for_run(first)?;
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].status, TrialStatus::Complete);
    assert_eq!(tests[0].end_ts, Some(ts("2024-05-01T10:00:03.000000Z")));

    let (info, bmc_type) = store.system_info()?.expect("system_info row");
    assert_eq!(info.hostname, "sut-b");
    assert_eq!(bmc_type.as_deref(), Some("ipmi"));
    store.close()?;

    // 4. Verify via a raw connection, as the analysis tool would
    let conn = rusqlite::Connection::open(&db_path)?;
    let tests: i64 = conn.query_row("SELECT count(*) FROM tests", [], |r| r.get(0))?;
    assert_eq!(tests, 2);
    let bmc: i64 = conn.query_row("SELECT count(*) FROM bmc", [], |r| r.get(0))?;
    assert_eq!(bmc, 2);
    let rapl: i64 = conn.query_row("SELECT count(*) FROM rapl", [], |r| r.get(0))?;
    assert_eq!(rapl, 2);
    let infos: i64 = conn.query_row("SELECT count(*) FROM system_info", [], |r| r.get(0))?;
    assert_eq!(infos, 1);

    Ok(())
}

#[test]
fn test_invalid_trial_has_null_end_ts() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("capping.db");
    let store = Store::open(&db_path)?;
    store.init_schema()?;

    let run = store.create_run(&ts("2024-05-01T10:00:00Z"), &serde_json::json!({}))?;
    let bad = store.begin_test(run, 50, 400, &ts("2024-05-01T10:00:01Z"))?;
    store.invalidate_test(bad, "set_cap_level failed: timeout")?;
    // a late completion must not revive it
    store.complete_test(bad, &ts("2024-05-01T10:00:05Z"))?;
    store.close()?;

    let conn = rusqlite::Connection::open(&db_path)?;
    let (end, status, error): (Option<String>, String, Option<String>) = conn.query_row(
        "SELECT end_ts, status, error FROM tests WHERE id = ?1",
        [bad],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    assert_eq!(end, None);
    assert_eq!(status, "invalid");
    assert_eq!(error.as_deref(), Some("set_cap_level failed: timeout"));
    Ok(())
}

#[test]
fn test_wal_allows_reader_during_run() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("capping.db");
    let store = Store::open(&db_path)?;
    store.init_schema()?;
    let run = store.create_run(&ts("2024-05-01T10:00:00Z"), &serde_json::json!({}))?;

    let reader = rusqlite::Connection::open(&db_path)?;
    let mode: String = reader.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
    assert_eq!(mode.to_lowercase(), "wal");

    store.begin_test(run, 10, 300, &ts("2024-05-01T10:00:01Z"))?;
    let n: i64 = reader.query_row("SELECT count(*) FROM tests", [], |r| r.get(0))?;
    assert_eq!(n, 1);
    Ok(())
}
