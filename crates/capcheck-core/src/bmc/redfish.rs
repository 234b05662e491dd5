use super::Bmc;
use crate::config::{BmcConfig, BmcKind};
use crate::errors::BmcError;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio::sync::{OnceCell, RwLock};

pub const REDFISH_ROOT: &str = "/redfish/v1";
const KNOWN_MOTHERBOARDS: &[&str] = &["motherboard", "self", "1"];
const LIMIT_TRIGGER_ACTION: &str = "#PowerControl.LimitTrigger";

#[derive(Debug, Clone)]
struct Session {
    token: String,
    location: Option<String>,
}

/// Redfish power control over HTTPS.
pub struct RedfishBmc {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    session: RwLock<Option<Session>>,
    chassis: OnceCell<String>,
}

impl RedfishBmc {
    pub fn new(cfg: &BmcConfig) -> Result<Self, BmcError> {
        let client = reqwest::Client::builder()
            // BMCs almost always ship self-signed certificates.
            .danger_accept_invalid_certs(!cfg.verify_tls)
            .timeout(cfg.command_timeout())
            .build()
            .map_err(|e| BmcError::Transport(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            base_url: base_url(&cfg.hostname),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            client,
            session: RwLock::new(None),
            chassis: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}/{}", self.base_url, REDFISH_ROOT, path)
        }
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.session.read().await.as_ref() {
            Some(s) => builder.header("X-Auth-Token", &s.token),
            None => builder.basic_auth(&self.username, Some(&self.password)),
        }
    }

    async fn exchange(&self, builder: RequestBuilder) -> Result<(StatusCode, String), BmcError> {
        let resp = builder.send().await.map_err(BmcError::from_reqwest)?;
        let status = resp.status();
        let body = resp.text().await.map_err(BmcError::from_reqwest)?;
        Ok((status, body))
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Value, BmcError> {
        let (status, body) = self.exchange(builder).await?;
        parse_response(what, status, &body)
    }

    /// First chassis member named like a motherboard. Looked up once.
    async fn motherboard(&self) -> Result<&str, BmcError> {
        self.chassis
            .get_or_try_init(|| async {
                let req = self.request(Method::GET, "Chassis").await;
                let body = self.send(req, "GET Chassis").await?;
                let names = chassis_names(&body);
                tracing::debug!(event = "redfish.chassis", chassis = ?names);
                names
                    .into_iter()
                    .find(|n| KNOWN_MOTHERBOARDS.contains(&n.to_lowercase().as_str()))
                    .ok_or_else(|| {
                        BmcError::Protocol("no motherboard chassis found under /Chassis".into())
                    })
            })
            .await
            .map(String::as_str)
    }

    async fn power_path(&self) -> Result<String, BmcError> {
        Ok(format!("Chassis/{}/Power", self.motherboard().await?))
    }

    async fn power_resource(&self) -> Result<Value, BmcError> {
        let path = self.power_path().await?;
        let req = self.request(Method::GET, &path).await;
        self.send(req, "GET Power").await
    }

    async fn limit_trigger(&self, trigger: &'static str) -> Result<(), BmcError> {
        let power = self.power_resource().await?;
        let target = match limit_trigger_target(&power) {
            Some(t) => t,
            None => format!("{}/Actions/LimitTrigger", self.power_path().await?),
        };
        let req = self
            .request(Method::POST, &target)
            .await
            .json(&json!({ "PowerLimitTrigger": trigger }));
        let (status, body) = self.exchange(req).await?;
        match trigger_response(status, &body) {
            Ok(()) => Ok(()),
            Err(BmcError::Unsupported(reason)) => {
                // Many BMCs lack the trigger and enforce the cap as soon as it is set.
                tracing::debug!(
                    event = "redfish.limit_trigger.unsupported",
                    trigger,
                    reason = %reason,
                    "treating limit trigger as a no-op"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn base_url(hostname: &str) -> String {
    let h = hostname.trim().trim_end_matches('/');
    if h.starts_with("http://") || h.starts_with("https://") {
        h.to_string()
    } else {
        format!("https://{}", h)
    }
}

fn parse_response(what: &str, status: StatusCode, body: &str) -> Result<Value, BmcError> {
    if !status.is_success() {
        return Err(BmcError::Protocol(format!(
            "{} returned {}: {}",
            what,
            status,
            body.trim()
        )));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
        .map_err(|e| BmcError::Protocol(format!("{} returned invalid json: {}", what, e)))
}

/// Only the limit trigger may be missing; every other endpoint is required.
fn trigger_response(status: StatusCode, body: &str) -> Result<(), BmcError> {
    if is_unsupported(status) {
        return Err(BmcError::Unsupported(format!(
            "POST LimitTrigger returned {}",
            status
        )));
    }
    parse_response("POST LimitTrigger", status, body).map(|_| ())
}

fn is_unsupported(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    )
}

fn chassis_names(body: &Value) -> Vec<String> {
    body.get("Members")
        .and_then(Value::as_array)
        .map(|members| {
            members
                .iter()
                .filter_map(|m| m.get("@odata.id").and_then(Value::as_str))
                .filter_map(|p| p.trim_end_matches('/').rsplit('/').next())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn power_control(power: &Value) -> Option<&Value> {
    power.get("PowerControl")?.as_array()?.first()
}

fn consumed_watts(power: &Value) -> Result<f64, BmcError> {
    power_control(power)
        .and_then(|pc| pc.get("PowerConsumedWatts"))
        .and_then(Value::as_f64)
        .ok_or_else(|| BmcError::Protocol("PowerControl[0].PowerConsumedWatts missing".into()))
}

fn limit_watts(power: &Value) -> Result<Option<f64>, BmcError> {
    let pc = power_control(power)
        .ok_or_else(|| BmcError::Protocol("PowerControl missing from Power".into()))?;
    Ok(pc.pointer("/PowerLimit/LimitInWatts").and_then(Value::as_f64))
}

fn limit_trigger_target(power: &Value) -> Option<String> {
    let from_control = power_control(power)
        .and_then(|pc| pc.pointer(&format!("/Actions/{}/target", LIMIT_TRIGGER_ACTION)));
    let from_resource = power.pointer(&format!("/Actions/{}/target", LIMIT_TRIGGER_ACTION));
    from_control
        .or(from_resource)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl Bmc for RedfishBmc {
    async fn current_power(&self) -> Result<f64, BmcError> {
        consumed_watts(&self.power_resource().await?)
    }

    async fn current_cap_level(&self) -> Result<Option<f64>, BmcError> {
        limit_watts(&self.power_resource().await?)
    }

    /// Both values come from the same Power resource, so one GET serves both.
    async fn read_power_and_cap(
        &self,
    ) -> (Result<f64, BmcError>, Result<Option<f64>, BmcError>) {
        match self.power_resource().await {
            Ok(power) => (consumed_watts(&power), limit_watts(&power)),
            Err(e) => (Err(e.clone()), Err(e)),
        }
    }

    async fn set_cap_level(&self, watts: u32) -> Result<(), BmcError> {
        let path = self.power_path().await?;
        let req = self
            .request(Method::PATCH, &path)
            .await
            .header("If-Match", "*")
            .json(&json!({ "PowerControl": [{ "PowerLimit": { "LimitInWatts": watts } }] }));
        self.send(req, "PATCH Power").await?;
        Ok(())
    }

    async fn activate_capping(&self) -> Result<(), BmcError> {
        self.limit_trigger("Activate").await
    }

    async fn deactivate_capping(&self) -> Result<(), BmcError> {
        self.limit_trigger("Deactivate").await
    }

    fn kind(&self) -> BmcKind {
        BmcKind::Redfish
    }

    async fn connect(&self) -> Result<(), BmcError> {
        let resp = self
            .client
            .post(self.url("SessionService/Sessions"))
            .json(&json!({ "UserName": self.username, "Password": self.password }))
            .send()
            .await
            .map_err(BmcError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BmcError::Protocol(format!(
                "failed to establish redfish session: {} {}",
                status,
                body.trim()
            )));
        }
        let token = resp
            .headers()
            .get("X-Auth-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BmcError::Protocol("session response without X-Auth-Token".into()))?;
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let location = location.or_else(|| {
            body.get("@odata.id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    body.get("Id")
                        .and_then(Value::as_str)
                        .map(|id| format!("{}/SessionService/Sessions/{}", REDFISH_ROOT, id))
                })
        });

        tracing::info!(event = "redfish.connected", base_url = %self.base_url);
        *self.session.write().await = Some(Session { token, location });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BmcError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        let Some(location) = session.location else {
            return Ok(());
        };
        let url = if location.starts_with("http") {
            location
        } else {
            self.url(&location)
        };
        let resp = self
            .client
            .delete(url)
            .header("X-Auth-Token", &session.token)
            .send()
            .await
            .map_err(BmcError::from_reqwest)?;
        if !resp.status().is_success() {
            tracing::warn!(
                event = "redfish.disconnect",
                status = %resp.status(),
                "unexpected status closing redfish session"
            );
        }
        Ok(())
    }
}
