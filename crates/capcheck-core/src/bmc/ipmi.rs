use super::Bmc;
use crate::config::{BmcConfig, BmcKind};
use crate::errors::BmcError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const POWER_READING: &[&str] = &["dcmi", "power", "reading"];
const GET_LIMIT: &[&str] = &["dcmi", "power", "get_limit"];
const SET_LIMIT: &[&str] = &["dcmi", "power", "set_limit", "limit"];
const ACTIVATE: &[&str] = &["dcmi", "power", "activate"];
const DEACTIVATE: &[&str] = &["dcmi", "power", "deactivate"];

const POWER_READING_KEY: &str = "Instantaneous power reading";
const LIMIT_STATE_KEY: &str = "Current Limit State";
const NO_ACTIVE_LIMIT: &str = "No Active Power Limit";
const POWER_LIMIT_KEY: &str = "Power Limit";

/// DCMI power management through the `ipmitool` executable.
pub struct IpmiBmc {
    ipmitool: PathBuf,
    hostname: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl IpmiBmc {
    pub fn new(cfg: &BmcConfig) -> Self {
        Self {
            ipmitool: cfg.ipmitool_path.clone(),
            hostname: cfg.hostname.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            timeout: cfg.command_timeout(),
        }
    }

    async fn run(&self, command: &[&str], extra: Option<String>) -> Result<IpmiOutput, BmcError> {
        let mut cmd = Command::new(&self.ipmitool);
        cmd.arg("-H")
            .arg(&self.hostname)
            .arg("-U")
            .arg(&self.username)
            .arg("-P")
            .arg(&self.password)
            .args(command)
            .args(extra.as_deref())
            // Output is parsed by field name.
            .env("LANG", "en_US.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let shown = command.join(" ");
        tracing::debug!(
            event = "ipmi.exec",
            program = %self.ipmitool.display(),
            host = %self.hostname,
            command = %shown
        );

        let child = cmd.spawn().map_err(|e| {
            BmcError::Transport(format!(
                "failed to launch {}: {}",
                self.ipmitool.display(),
                e
            ))
        })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BmcError::Transport(format!("`{}` timed out after {:?}", shown, self.timeout))
            })?
            .map_err(|e| BmcError::Transport(format!("`{}` i/o error: {}", shown, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BmcError::Protocol(format!(
                "`{}` exited with {}: {}",
                shown,
                output.status,
                stderr.trim()
            )));
        }

        Ok(IpmiOutput {
            fields: parse_fields(&stdout),
            command: shown,
        })
    }
}

struct IpmiOutput {
    fields: HashMap<String, String>,
    command: String,
}

impl IpmiOutput {
    fn field(&self, key: &str) -> Result<&str, BmcError> {
        self.fields.get(key).map(String::as_str).ok_or_else(|| {
            BmcError::Protocol(format!("`{}` output has no '{}' field", self.command, key))
        })
    }
}

/// `key : value` lines; everything else is ignored.
fn parse_fields(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            if v.contains(':') {
                return None;
            }
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// "300 Watts" -> 300.0
fn parse_watts(value: &str) -> Option<f64> {
    value.split_whitespace().next()?.parse().ok()
}

#[async_trait]
impl Bmc for IpmiBmc {
    async fn current_power(&self) -> Result<f64, BmcError> {
        let out = self.run(POWER_READING, None).await?;
        let raw = out.field(POWER_READING_KEY)?;
        parse_watts(raw)
            .ok_or_else(|| BmcError::Protocol(format!("unparsable power reading '{}'", raw)))
    }

    async fn current_cap_level(&self) -> Result<Option<f64>, BmcError> {
        let out = self.run(GET_LIMIT, None).await?;
        if out.fields.get(LIMIT_STATE_KEY).map(String::as_str) == Some(NO_ACTIVE_LIMIT) {
            return Ok(None);
        }
        let raw = out.field(POWER_LIMIT_KEY)?;
        parse_watts(raw)
            .map(Some)
            .ok_or_else(|| BmcError::Protocol(format!("unparsable power limit '{}'", raw)))
    }

    async fn set_cap_level(&self, watts: u32) -> Result<(), BmcError> {
        self.run(SET_LIMIT, Some(watts.to_string())).await?;
        Ok(())
    }

    async fn activate_capping(&self) -> Result<(), BmcError> {
        self.run(ACTIVATE, None).await?;
        Ok(())
    }

    async fn deactivate_capping(&self) -> Result<(), BmcError> {
        self.run(DEACTIVATE, None).await?;
        Ok(())
    }

    fn kind(&self) -> BmcKind {
        BmcKind::Ipmi
    }
}
