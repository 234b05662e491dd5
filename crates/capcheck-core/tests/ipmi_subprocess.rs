#![cfg(unix)]

use capcheck_core::bmc::{Bmc, IpmiBmc};
use capcheck_core::config::{BmcConfig, BmcKind};
use capcheck_core::errors::BmcError;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Stands in for `ipmitool`, keeping the power limit in a file next to itself.
const FAKE_IPMITOOL: &str = r#"#!/bin/sh
dir=$(dirname "$0")
[ "$1" = "-H" ] && [ "$3" = "-U" ] && [ "$5" = "-P" ] || { echo "bad args: $*" >&2; exit 2; }
shift 6
[ "$1 $2" = "dcmi power" ] || { echo "unexpected: $*" >&2; exit 1; }
case "$3" in
  reading)
    echo "    Instantaneous power reading:                   312 Watts"
    echo "    IPMI timestamp:                           Thu Jan  1 00:00:00 2024"
    ;;
  get_limit)
    if [ -f "$dir/limit" ]; then
      echo "    Current Limit State: Power Limit Active"
      echo "    Power Limit:         $(cat "$dir/limit") Watts"
    else
      echo "    Current Limit State: No Active Power Limit"
      echo "    Power Limit:         0 Watts"
    fi
    ;;
  set_limit)
    echo "$5" > "$dir/limit"
    echo "    Power limit successfully set"
    ;;
  activate|deactivate)
    echo "    Power limit successfully $3d"
    ;;
  *)
    exit 1
    ;;
esac
"#;

fn install(dir: &Path, body: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join("ipmitool");
    std::fs::write(&path, body)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn config(ipmitool_path: PathBuf, timeout: u64) -> BmcConfig {
    BmcConfig {
        kind: BmcKind::Ipmi,
        hostname: "10.0.0.5".into(),
        username: "admin".into(),
        password: "secret".into(),
        ipmitool_path,
        verify_tls: false,
        command_timeout_seconds: timeout,
    }
}

#[tokio::test]
async fn test_dcmi_roundtrip_through_subprocess() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let bmc = IpmiBmc::new(&config(install(dir.path(), FAKE_IPMITOOL)?, 10));

    assert_eq!(bmc.current_power().await?, 312.0);
    assert_eq!(bmc.current_cap_level().await?, None);

    bmc.set_cap_level(560).await?;
    bmc.activate_capping().await?;
    assert_eq!(bmc.current_cap_level().await?, Some(560.0));
    bmc.deactivate_capping().await?;
    Ok(())
}

#[tokio::test]
async fn test_nonzero_exit_is_protocol_error() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let script = "#!/bin/sh\necho 'Unable to establish IPMI v2 / RMCP+ session' >&2\nexit 1\n";
    let bmc = IpmiBmc::new(&config(install(dir.path(), script)?, 10));

    match bmc.set_cap_level(400).await {
        Err(BmcError::Protocol(msg)) => assert!(msg.contains("RMCP+"), "{}", msg),
        other => panic!("expected protocol error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_unparsable_output_is_protocol_error() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let script = "#!/bin/sh\necho 'Instantaneous power reading: n/a'\n";
    let bmc = IpmiBmc::new(&config(install(dir.path(), script)?, 10));

    let err = bmc.current_power().await.unwrap_err();
    assert!(matches!(err, BmcError::Protocol(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_missing_executable_is_transport_error() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let bmc = IpmiBmc::new(&config(dir.path().join("no-such-ipmitool"), 10));

    let err = bmc.current_cap_level().await.unwrap_err();
    assert!(matches!(err, BmcError::Transport(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_hung_subprocess_times_out() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let script = "#!/bin/sh\nsleep 30\n";
    let bmc = IpmiBmc::new(&config(install(dir.path(), script)?, 1));

    let err = bmc.current_power().await.unwrap_err();
    match err {
        BmcError::Transport(msg) => assert!(msg.contains("timed out"), "{}", msg),
        other => panic!("expected transport error, got {:?}", other),
    }
    Ok(())
}
