//! Client for the agent running on the system under test.

use crate::config::{normalize_agent_url, AgentConfig};
use crate::errors::AgentError;
use crate::model::{RaplReading, SystemInfo};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn system_info(&self) -> Result<SystemInfo, AgentError>;

    /// Per-package power as of the call.
    async fn rapl_power(&self) -> Result<Vec<RaplReading>, AgentError>;

    /// Start the load generator. Returns once the agent has accepted the
    /// request; the load runs for `runtime_secs` on its own.
    async fn start_load(&self, load_pct: u32, runtime_secs: u64) -> Result<(), AgentError>;
}

/// The agent answers `/rapl_power` either as a list of readings or as a map
/// keyed by package name.
#[derive(Deserialize)]
#[serde(untagged)]
enum RaplPayload {
    List(Vec<RaplReading>),
    Map(BTreeMap<String, f64>),
}

impl From<RaplPayload> for Vec<RaplReading> {
    fn from(p: RaplPayload) -> Self {
        match p {
            RaplPayload::List(v) => v,
            RaplPayload::Map(m) => m
                .into_iter()
                .map(|(package_id, power_watts)| RaplReading {
                    package_id,
                    power_watts,
                })
                .collect(),
        }
    }
}

pub struct HttpAgentClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new(cfg: &AgentConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()
            .map_err(|e| AgentError::Transport(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            base_url: normalize_agent_url(&cfg.url),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<T, AgentError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, route))
            .send()
            .await
            .map_err(AgentError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let text = resp.text().await.map_err(AgentError::from_reqwest)?;
        serde_json::from_str(&text)
            .map_err(|e| AgentError::Protocol(format!("GET {}: invalid payload: {}", route, e)))
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn system_info(&self) -> Result<SystemInfo, AgentError> {
        self.get_json("/system_info").await
    }

    async fn rapl_power(&self) -> Result<Vec<RaplReading>, AgentError> {
        let payload: RaplPayload = self.get_json("/rapl_power").await?;
        Ok(payload.into())
    }

    async fn start_load(&self, load_pct: u32, runtime_secs: u64) -> Result<(), AgentError> {
        let resp = self
            .client
            .post(format!("{}/firestarter", self.base_url))
            .json(&serde_json::json!({
                "load_pct": load_pct,
                "runtime_secs": runtime_secs,
            }))
            .send()
            .await
            .map_err(AgentError::from_reqwest)?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(
                event = "agent.load_started",
                load_pct,
                runtime_secs,
                status = status.as_u16()
            );
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(AgentError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
