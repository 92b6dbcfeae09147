#![cfg(unix)]

use anyhow::Result;
use policy_test::channel::{CommandChannel, SessionConfig, SshSession};
use policy_test::error::TransportError;
use policy_test::parser::{PacketTracerParser, ResponseParser};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{TempDir, tempdir};

const TRACE: &str = "packet-tracer input inside tcp 10.0.0.1 1024 192.0.2.1 443 detail";

/// A shell stand-in for the firewall CLI: echoes input, enters privileged
/// mode with `s3cret`, answers packet-tracer with an allow verdict.
const DEVICE: &str = r#"#!/bin/sh
prompt='fw01> '
mode=user
printf 'Type help or ? for a list of available commands.\n%s' "$prompt"
while IFS= read -r line; do
  if [ "$mode" = pw ]; then
    if [ "$line" = "s3cret" ]; then
      mode=priv
      prompt='fw01# '
      printf '\n%s' "$prompt"
    else
      mode=user
      printf '\n%% Invalid password\n%s' "$prompt"
    fi
    continue
  fi
  printf '%s\n' "$line"
  case "$line" in
    enable) mode=pw; printf 'Password: ' ;;
    packet-tracer*) printf 'Phase: 1\nType: ACCESS-LIST\nResult: ALLOW\n\nResult:\noutput-interface: outside\nAction: allow\n%s' "$prompt" ;;
    exit) exit 0 ;;
    *) printf '%s' "$prompt" ;;
  esac
done
"#;

fn install(dir: &Path, body: &str) -> Result<String> {
    let path = dir.join("fake-ssh");
    fs::write(&path, body)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path.to_string_lossy().into_owned())
}

fn config(script: String, timeout: Duration) -> SessionConfig {
    let mut cfg = SessionConfig::new("fw01", 22, "admin");
    cfg.ssh_command = script;
    cfg.timeout = timeout;
    cfg
}

/// Freshly written scripts can briefly be "text file busy" while another
/// test thread forks; retry the spawn in that case only.
fn open(cfg: &SessionConfig) -> Result<SshSession, TransportError> {
    let mut attempts = 0;
    loop {
        match SshSession::open(cfg) {
            Err(TransportError::Spawn { source, .. })
                if source.raw_os_error() == Some(26) && attempts < 5 =>
            {
                attempts += 1;
                thread::sleep(Duration::from_millis(50));
            }
            other => return other,
        }
    }
}

fn device(body: &str) -> Result<(TempDir, String)> {
    let dir = tempdir()?;
    let script = install(dir.path(), body)?;
    Ok((dir, script))
}

#[test]
fn enables_answers_and_closes() -> Result<()> {
    let (_dir, script) = device(DEVICE)?;
    let mut cfg = config(script, Duration::from_secs(5));
    cfg.enable_password = Some("s3cret".to_string());

    let mut session = open(&cfg)?;
    let body = session.send(TRACE)?;
    assert_eq!(
        body,
        "Phase: 1\nType: ACCESS-LIST\nResult: ALLOW\n\nResult:\noutput-interface: outside\nAction: allow"
    );
    assert_eq!(PacketTracerParser.parse(&body).action.as_deref(), Some("allow"));

    let started = Instant::now();
    session.close()?;
    assert!(started.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[test]
fn wrong_enable_password_is_rejected() -> Result<()> {
    let (_dir, script) = device(DEVICE)?;
    let mut cfg = config(script, Duration::from_secs(5));
    cfg.enable_password = Some("guess".to_string());

    let Err(err) = open(&cfg) else {
        panic!("session opened with a wrong enable password");
    };
    assert!(matches!(err, TransportError::Rejected(_)), "{err}");
    Ok(())
}

#[test]
fn unprivileged_session_still_opens() -> Result<()> {
    let (_dir, script) = device(DEVICE)?;
    let mut session = open(&config(script, Duration::from_secs(5)))?;
    assert!(session.send(TRACE)?.ends_with("Action: allow"));
    session.close()?;
    Ok(())
}

#[test]
fn silent_device_times_out() -> Result<()> {
    let (_dir, script) = device("#!/bin/sh\nexec sleep 30\n")?;
    let timeout = Duration::from_millis(300);
    let started = Instant::now();

    let Err(err) = open(&config(script, timeout)) else {
        panic!("session opened without a prompt");
    };
    assert!(matches!(err, TransportError::Timeout(t) if t == timeout), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
    Ok(())
}

#[test]
fn device_hanging_up_mid_run_is_closed() -> Result<()> {
    let hangs_up = r#"#!/bin/sh
printf 'fw01# '
while IFS= read -r line; do
  case "$line" in
    packet-tracer*) exit 0 ;;
    *) printf '%s\nfw01# ' "$line" ;;
  esac
done
"#;
    let (_dir, script) = device(hangs_up)?;
    let mut session = open(&config(script, Duration::from_secs(5)))?;
    let err = session.send(TRACE).unwrap_err();
    assert!(matches!(err, TransportError::Closed), "{err}");
    Ok(())
}

#[test]
fn close_kills_a_device_that_ignores_exit() -> Result<()> {
    let stubborn = r#"#!/bin/sh
printf 'fw01# '
while IFS= read -r line; do
  printf '%s\nfw01# ' "$line"
done
"#;
    let (_dir, script) = device(stubborn)?;
    let session = open(&config(script, Duration::from_secs(5)))?;
    let started = Instant::now();
    session.close()?;
    assert!(started.elapsed() < Duration::from_secs(10));
    Ok(())
}
