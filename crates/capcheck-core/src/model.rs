use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One (load, cap) experiment in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub load_percent: u32,
    pub cap_watts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Running,
    Complete,
    Invalid,
}

impl TrialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialStatus::Running => "running",
            TrialStatus::Complete => "complete",
            TrialStatus::Invalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "complete" => TrialStatus::Complete,
            "running" => TrialStatus::Running,
            _ => TrialStatus::Invalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// A row of the `tests` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunRow {
    pub id: i64,
    pub run_id: i64,
    pub load_percent: u32,
    pub cap_level: u32,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub status: TrialStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BmcSample {
    pub timestamp: DateTime<Utc>,
    pub power_watts: f64,
    pub cap_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaplSample {
    pub timestamp: DateTime<Utc>,
    pub package_id: String,
    pub power_watts: f64,
}

/// Per-package power as reported by the agent, before it is timestamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaplReading {
    pub package_id: String,
    pub power_watts: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SetCapLevel,
    ActivateCapping,
    DeactivateCapping,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::SetCapLevel => "set_cap_level",
            CommandType::ActivateCapping => "activate_capping",
            CommandType::DeactivateCapping => "deactivate_capping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CappingCommand {
    pub timestamp: DateTime<Utc>,
    pub command_type: CommandType,
    pub value: Option<u32>,
}

/// Identity of the system under test, as served by the agent's
/// `/system_info` route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    #[serde(default, alias = "os_name")]
    pub os: Option<String>,
    #[serde(default, alias = "model_name")]
    pub cpu: Option<String>,
    #[serde(default, alias = "bios_version")]
    pub firmware: Option<String>,
    /// Anything else the agent reports (sockets, BIOS vendor, board...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_info_accepts_agent_aliases() {
        let raw = serde_json::json!({
            "hostname": "sut01",
            "os_name": "Rocky Linux 9.3",
            "model_name": "Intel(R) Xeon(R) Platinum 8480+",
            "bios_version": "1.4.2",
            "sockets": 2,
            "architecture": "x86_64"
        });
        let info: SystemInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.hostname, "sut01");
        assert_eq!(info.os.as_deref(), Some("Rocky Linux 9.3"));
        assert_eq!(info.firmware.as_deref(), Some("1.4.2"));
        assert_eq!(info.extra.get("sockets"), Some(&serde_json::json!(2)));
        assert!(!info.extra.contains_key("os_name"));
    }

    #[test]
    fn test_unknown_trial_status_reads_as_invalid() {
        assert_eq!(TrialStatus::parse("complete"), TrialStatus::Complete);
        assert_eq!(TrialStatus::parse("garbage"), TrialStatus::Invalid);
    }
}
