use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapcheckConfig {
    pub bmc: BmcConfig,
    pub agent: AgentConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Cap restored once the campaign is over. `None` leaves the last cap.
    #[serde(default = "default_uncapped_power")]
    pub uncapped_power: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BmcKind {
    Ipmi,
    Redfish,
}

impl BmcKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BmcKind::Ipmi => "ipmi",
            BmcKind::Redfish => "redfish",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BmcConfig {
    pub kind: BmcKind,
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_ipmitool_path")]
    pub ipmitool_path: PathBuf,
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

impl std::fmt::Debug for BmcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BmcConfig")
            .field("kind", &self.kind)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ipmitool_path", &self.ipmitool_path)
            .field("verify_tls", &self.verify_tls)
            .field("command_timeout_seconds", &self.command_timeout_seconds)
            .finish()
    }
}

impl BmcConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub url: String,
    #[serde(default = "default_agent_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub min_load: u32,
    pub max_load: u32,
    pub load_delta: u32,
    pub cap_min: u32,
    pub cap_max: u32,
    pub cap_delta: u32,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            min_load: 90,
            max_load: 100,
            load_delta: 5,
            cap_min: 340,
            cap_max: 1000,
            cap_delta: 110,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    pub trial_seconds: u64,
    pub inter_trial_pause_seconds: u64,
    pub sample_interval_ms: u64,
    pub tail_seconds: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            trial_seconds: 30,
            inter_trial_pause_seconds: 5,
            sample_interval_ms: 1000,
            tail_seconds: 3,
        }
    }
}

fn default_uncapped_power() -> Option<u32> {
    Some(1400)
}

fn default_ipmitool_path() -> PathBuf {
    PathBuf::from("/usr/bin/ipmitool")
}

fn default_command_timeout() -> u64 {
    30
}

fn default_agent_timeout() -> u64 {
    10
}

/// Agent URLs are often given as `host:port`.
pub fn normalize_agent_url(url: &str) -> String {
    let url = url.trim();
    let with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    with_scheme.trim_end_matches('/').to_string()
}

pub fn load_config(path: &Path, strict: bool) -> Result<CapcheckConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e.0, path.display())))
}

pub fn parse_config(raw: &str, strict: bool) -> Result<CapcheckConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let mut cfg: CapcheckConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    if !ignored_keys.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields detected in strict mode: {:?}",
                ignored_keys
            )));
        }
        tracing::warn!(
            event = "config.unknown_fields",
            fields = ?ignored_keys,
            "ignoring unknown config fields"
        );
    }

    apply_env_overrides(&mut cfg);
    cfg.agent.url = normalize_agent_url(&cfg.agent.url);
    validate(&cfg)?;
    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut CapcheckConfig) {
    if let Ok(v) = std::env::var("CAPCHECK_BMC_USERNAME") {
        cfg.bmc.username = v;
    }
    if let Ok(v) = std::env::var("CAPCHECK_BMC_PASSWORD") {
        cfg.bmc.password = v;
    }
    if let Ok(v) = std::env::var("CAPCHECK_AGENT_URL") {
        cfg.agent.url = v;
    }
}

pub fn validate(cfg: &CapcheckConfig) -> Result<(), ConfigError> {
    let c = &cfg.campaign;
    if c.min_load > c.max_load {
        return Err(ConfigError(format!(
            "min_load ({}) exceeds max_load ({})",
            c.min_load, c.max_load
        )));
    }
    if c.max_load > 100 {
        return Err(ConfigError(format!(
            "max_load ({}) must be a percentage (0-100)",
            c.max_load
        )));
    }
    if c.load_delta == 0 && c.min_load != c.max_load {
        return Err(ConfigError("load_delta must be > 0".into()));
    }
    if c.cap_min > c.cap_max {
        return Err(ConfigError(format!(
            "cap_min ({}) exceeds cap_max ({})",
            c.cap_min, c.cap_max
        )));
    }
    if c.cap_delta == 0 && c.cap_min != c.cap_max {
        return Err(ConfigError("cap_delta must be > 0".into()));
    }
    if cfg.timing.sample_interval_ms == 0 {
        return Err(ConfigError("sample_interval_ms must be > 0".into()));
    }
    if cfg.bmc.hostname.trim().is_empty() {
        return Err(ConfigError("bmc.hostname is required".into()));
    }
    if cfg.agent.url.trim_start_matches("http://").is_empty() {
        return Err(ConfigError("agent.url is required".into()));
    }
    Ok(())
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

pub const SAMPLE_CONFIG: &str = r#"bmc:
  kind: ipmi            # ipmi | redfish
  hostname: bmc.example.org
  username: admin
  # password: set CAPCHECK_BMC_PASSWORD instead
  ipmitool_path: /usr/bin/ipmitool
  verify_tls: false
  command_timeout_seconds: 30
agent:
  url: sut.example.org:5432
  timeout_seconds: 10
campaign:
  min_load: 90
  max_load: 100
  load_delta: 5
  cap_min: 340
  cap_max: 1000
  cap_delta: 110
timing:
  trial_seconds: 30
  inter_trial_pause_seconds: 5
  sample_interval_ms: 1000
  tail_seconds: 3
uncapped_power: 1400
"#;
