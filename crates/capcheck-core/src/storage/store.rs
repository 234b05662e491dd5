use crate::clock::{format_ts, parse_ts};
use crate::errors::StoreError;
use crate::model::{
    BmcSample, CappingCommand, RaplSample, RunStatus, SystemInfo, TestRunRow, TrialStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Handle on the results database.
///
/// Clones share one connection; every write takes the lock, so the collector
/// and the sequencer can write from separate tasks without coordinating.
#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // Lets the analysis tool read the file while a run is appending.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    /// Closes the connection if this is the last handle. Otherwise the other
    /// handles keep it open and it closes when they drop.
    pub fn close(self) -> Result<(), StoreError> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner().map_err(|_| StoreError::Poisoned)?;
                conn.close().map_err(|(_, e)| StoreError::Database(e))
            }
            Err(_) => Ok(()),
        }
    }

    // runs
    pub fn create_run(
        &self,
        started_at: &DateTime<Utc>,
        config: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs(started_at, status, config_json) VALUES (?1, ?2, ?3)",
            params![
                format_ts(started_at),
                RunStatus::Running.as_str(),
                serde_json::to_string(config)?
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finalize_run(
        &self,
        run_id: i64,
        finished_at: &DateTime<Utc>,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET status=?1, finished_at=?2 WHERE id=?3",
            params![status.as_str(), format_ts(finished_at), run_id],
        )?;
        Ok(())
    }

    pub fn latest_run_id(&self) -> Result<Option<i64>, StoreError> {
        let conn = self.lock()?;
        let id = conn
            .query_row("SELECT max(id) FROM runs", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();
        Ok(id)
    }

    // tests
    pub fn begin_test(
        &self,
        run_id: i64,
        load_percent: u32,
        cap_level: u32,
        start_ts: &DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tests(run_id, load_percent, cap_level, start_ts, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                load_percent,
                cap_level,
                format_ts(start_ts),
                TrialStatus::Running.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn complete_test(&self, test_id: i64, end_ts: &DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tests SET end_ts=?1, status=?2 WHERE id=?3 AND status=?4",
            params![
                format_ts(end_ts),
                TrialStatus::Complete.as_str(),
                test_id,
                TrialStatus::Running.as_str()
            ],
        )?;
        Ok(())
    }

    /// Invalid trials keep a NULL `end_ts`.
    pub fn invalidate_test(&self, test_id: i64, error: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tests SET status=?1, error=?2, end_ts=NULL WHERE id=?3",
            params![TrialStatus::Invalid.as_str(), error, test_id],
        )?;
        Ok(())
    }

    pub fn tests_for_run(&self, run_id: i64) -> Result<Vec<TestRunRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, load_percent, cap_level, start_ts, end_ts, status, error
             FROM tests WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let start: String = row.get(4)?;
            let end: Option<String> = row.get(5)?;
            Ok(TestRunRow {
                id: row.get(0)?,
                run_id: row.get(1)?,
                load_percent: row.get(2)?,
                cap_level: row.get(3)?,
                start_ts: ts_column(4, &start)?,
                end_ts: end.as_deref().map(|e| ts_column(5, e)).transpose()?,
                status: TrialStatus::parse(&row.get::<_, String>(6)?),
                error: row.get(7)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // samples
    /// One collector tick: the BMC row and every RAPL row land in a single
    /// transaction.
    pub fn insert_tick(
        &self,
        run_id: i64,
        bmc: Option<&BmcSample>,
        rapl: &[RaplSample],
    ) -> Result<(), StoreError> {
        if bmc.is_none() && rapl.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if let Some(s) = bmc {
            tx.execute(
                "INSERT INTO bmc(run_id, timestamp, power_watts, cap_level) VALUES (?1, ?2, ?3, ?4)",
                params![run_id, format_ts(&s.timestamp), s.power_watts, s.cap_level],
            )?;
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO rapl(run_id, timestamp, package_id, power_watts) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for s in rapl {
                stmt.execute(params![
                    run_id,
                    format_ts(&s.timestamp),
                    s.package_id,
                    s.power_watts
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_capping_command(
        &self,
        run_id: i64,
        cmd: &CappingCommand,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO capping_commands(run_id, timestamp, command_type, value) VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id,
                format_ts(&cmd.timestamp),
                cmd.command_type.as_str(),
                cmd.value
            ],
        )?;
        Ok(())
    }

    pub fn capping_commands_for_run(
        &self,
        run_id: i64,
    ) -> Result<Vec<(String, String, Option<u32>)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, command_type, value FROM capping_commands
             WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // system info
    pub fn upsert_system_info(
        &self,
        info: &SystemInfo,
        bmc_type: &str,
        updated_at: &DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO system_info(id, hostname, os, cpu, firmware, bmc_type, extra_json, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                hostname=excluded.hostname,
                os=excluded.os,
                cpu=excluded.cpu,
                firmware=excluded.firmware,
                bmc_type=excluded.bmc_type,
                extra_json=excluded.extra_json,
                updated_at=excluded.updated_at",
            params![
                info.hostname,
                info.os,
                info.cpu,
                info.firmware,
                bmc_type,
                serde_json::to_string(&info.extra)?,
                format_ts(updated_at)
            ],
        )?;
        Ok(())
    }

    pub fn system_info(&self) -> Result<Option<(SystemInfo, Option<String>)>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT hostname, os, cpu, firmware, bmc_type, extra_json FROM system_info WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((hostname, os, cpu, firmware, bmc_type, extra_json)) = row else {
            return Ok(None);
        };
        let extra = match extra_json {
            Some(s) if !s.trim().is_empty() => serde_json::from_str(&s)?,
            _ => Default::default(),
        };
        Ok(Some((
            SystemInfo {
                hostname,
                os,
                cpu,
                firmware,
                extra,
            },
            bmc_type,
        )))
    }
}

/// Reads a stored timestamp, failing the row rather than inventing a value.
pub(crate) fn ts_column(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp {:?}", raw).into(),
        )
    })
}
