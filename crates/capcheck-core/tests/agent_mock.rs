use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use capcheck_core::agent::{AgentClient, HttpAgentClient};
use capcheck_core::config::AgentConfig;
use capcheck_core::errors::AgentError;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

struct MockAgent {
    rapl: Value,
    busy: Mutex<bool>,
    loads: Mutex<Vec<Value>>,
}

impl MockAgent {
    fn new(rapl: Value) -> Arc<Self> {
        Arc::new(Self {
            rapl,
            busy: Mutex::new(false),
            loads: Mutex::new(Vec::new()),
        })
    }
}

async fn system_info() -> Json<Value> {
    Json(json!({
        "hostname": "sut01",
        "os_name": "Ubuntu 22.04.4 LTS",
        "model_name": "AMD EPYC 9654 96-Core Processor",
        "bios_version": "2.1",
        "sockets": 2
    }))
}

async fn rapl(State(state): State<Arc<MockAgent>>) -> Json<Value> {
    Json(state.rapl.clone())
}

async fn firestarter(State(state): State<Arc<MockAgent>>, Json(body): Json<Value>) -> StatusCode {
    let mut busy = state.busy.lock().unwrap();
    if *busy {
        return StatusCode::CONFLICT;
    }
    *busy = true;
    state.loads.lock().unwrap().push(body);
    StatusCode::ACCEPTED
}

async fn serve(state: Arc<MockAgent>) -> anyhow::Result<String> {
    let app = Router::new()
        .route("/system_info", get(system_info))
        .route("/rapl_power", get(rapl))
        .route("/firestarter", post(firestarter))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    // host:port without a scheme, as operators usually write it
    Ok(addr.to_string())
}

fn client(url: String) -> anyhow::Result<HttpAgentClient> {
    Ok(HttpAgentClient::new(&AgentConfig {
        url,
        timeout_seconds: 5,
    })?)
}

#[tokio::test]
async fn test_system_info_aliases() -> anyhow::Result<()> {
    let agent = client(serve(MockAgent::new(json!([]))).await?)?;
    assert!(agent.base_url().starts_with("http://127.0.0.1:"));

    let info = agent.system_info().await?;
    assert_eq!(info.hostname, "sut01");
    assert_eq!(info.os.as_deref(), Some("Ubuntu 22.04.4 LTS"));
    assert_eq!(info.cpu.as_deref(), Some("AMD EPYC 9654 96-Core Processor"));
    assert_eq!(info.firmware.as_deref(), Some("2.1"));
    assert_eq!(info.extra.get("sockets"), Some(&json!(2)));
    Ok(())
}

#[tokio::test]
async fn test_rapl_list_and_map_forms() -> anyhow::Result<()> {
    let list = client(
        serve(MockAgent::new(json!([
            { "package_id": "package-0", "power_watts": 140.5 },
            { "package_id": "package-1", "power_watts": 138.0 }
        ])))
        .await?,
    )?;
    let readings = list.rapl_power().await?;
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].power_watts, 140.5);

    let map = client(serve(MockAgent::new(json!({ "package-0": 99.5 }))).await?)?;
    let readings = map.rapl_power().await?;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].package_id, "package-0");
    Ok(())
}

#[tokio::test]
async fn test_rapl_garbage_is_protocol_error() -> anyhow::Result<()> {
    let agent = client(serve(MockAgent::new(json!("warming up"))).await?)?;
    let err = agent.rapl_power().await.unwrap_err();
    assert!(matches!(err, AgentError::Protocol(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_firestarter_accepts_then_rejects_while_busy() -> anyhow::Result<()> {
    let state = MockAgent::new(json!([]));
    let agent = client(serve(state.clone()).await?)?;

    agent.start_load(75, 30).await?;
    assert_eq!(
        state.loads.lock().unwrap().as_slice(),
        &[json!({ "load_pct": 75, "runtime_secs": 30 })]
    );

    match agent.start_load(80, 30).await {
        Err(AgentError::Rejected { status, .. }) => assert_eq!(status, 409),
        other => panic!("expected rejection, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_agent_down_is_transport_error() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let agent = client(addr.to_string())?;
    let err = agent.system_info().await.unwrap_err();
    assert!(matches!(err, AgentError::Transport(_)), "{:?}", err);
    Ok(())
}
