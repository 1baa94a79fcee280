//! Integration tests for pfwd
//!
//! These tests drive the production `NftCli`, `Systemctl`, and `ProcSysctl`
//! implementations against mock scripts instead of the real system
//! binaries, so the full command-construction and parsing path runs without
//! privileges or a live nftables.
//!
//! Each test writes its own mock scripts into a temp directory and points
//! the `PFWD_*_COMMAND` overrides at them. The mock nft keeps a state file
//! (`MOCK_NFT_STATE`) that accumulates applied batches, which is enough to
//! observe table lifecycle, idempotence, and persistence end to end.

use pfwd::core::engine::{NftCli, RuleEngine};
use pfwd::core::forward::{self, AddrFamily, ForwardIntent};
use pfwd::core::persist;
use pfwd::core::service::Systemctl;
use pfwd::core::sysctl::{KernelParams, ProcSysctl};
use pfwd::core::table::{self, ClearOutcome};
use pfwd::menu::Dispatcher;
use pfwd::settings::Settings;
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;

/// All tests mutate process-wide environment variables; serialize them.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const MOCK_NFT: &str = r#"#!/bin/sh
# Stateful mock nft. Applied batches accumulate in $MOCK_NFT_STATE.
STATE="${MOCK_NFT_STATE:?}"
case "$1 $2" in
  "list table")
    grep -q '"add":{"table"' "$STATE" 2>/dev/null && exit 0
    echo "Error: No such file or directory" >&2
    exit 1
    ;;
  "list chain")
    grep -q "\"name\":\"$5\"" "$STATE" 2>/dev/null && exit 0
    echo "Error: No such file or directory" >&2
    exit 1
    ;;
  "list ruleset")
    [ -f "$STATE" ] && cat "$STATE"
    exit 0
    ;;
  "delete table")
    if grep -q '"add":{"table"' "$STATE" 2>/dev/null; then
      rm -f "$STATE"
      exit 0
    fi
    echo "Error: No such file or directory" >&2
    exit 1
    ;;
  *)
    # --json -f -: append the batch from stdin
    cat >> "$STATE"
    printf '\n' >> "$STATE"
    exit 0
    ;;
esac
"#;

const MOCK_SYSTEMCTL: &str = r#"#!/bin/sh
echo "$@" >> "${MOCK_SYSTEMCTL_LOG:?}"
exit 0
"#;

const MOCK_SYSCTL: &str = r#"#!/bin/sh
echo "$@" >> "${MOCK_SYSCTL_LOG:?}"
exit 0
"#;

fn write_mock(dir: &Path, name: &str, content: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_str().unwrap().to_string()
}

/// Installs the mock scripts and wires the environment to them.
fn setup_mocks(dir: &Path) -> Settings {
    let nft = write_mock(dir, "nft", MOCK_NFT);
    let systemctl = write_mock(dir, "systemctl", MOCK_SYSTEMCTL);
    let sysctl = write_mock(dir, "sysctl", MOCK_SYSCTL);

    let state = dir.join("nft-state");
    let syslog = dir.join("systemctl-log");
    let sysctl_log = dir.join("sysctl-log");

    unsafe {
        std::env::set_var("PFWD_TEST_NO_ELEVATION", "1");
        std::env::set_var("PFWD_NFT_COMMAND", &nft);
        std::env::set_var("PFWD_SYSTEMCTL_COMMAND", &systemctl);
        std::env::set_var("PFWD_SYSCTL_COMMAND", &sysctl);
        std::env::set_var("MOCK_NFT_STATE", &state);
        std::env::set_var("MOCK_SYSTEMCTL_LOG", &syslog);
        std::env::set_var("MOCK_SYSCTL_LOG", &sysctl_log);
    }

    Settings {
        sysctl_conf: dir.join("sysctl.conf"),
        nft_conf: dir.join("nftables.conf"),
        nft_service: "nftables".to_string(),
        audit_enabled: false,
    }
}

fn state_content() -> String {
    let state = std::env::var("MOCK_NFT_STATE").unwrap();
    std::fs::read_to_string(state).unwrap_or_default()
}

#[test]
fn test_add_forward_end_to_end() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    setup_mocks(dir.path());

    let engine = NftCli;
    assert!(!engine.table_exists().unwrap());

    let intent = ForwardIntent::new(AddrFamily::V4, 8080, "10.0.0.5".to_string(), None);
    forward::install(&engine, &intent).unwrap();

    assert!(engine.table_exists().unwrap());
    assert!(engine.chain_exists("prerouting").unwrap());
    assert!(engine.chain_exists("postrouting").unwrap());

    let state = state_content();
    assert!(state.contains("\"addr\":\"10.0.0.5\""));
    assert!(state.contains("\"dnat\""));
    assert!(state.contains("\"masquerade\""));
}

#[test]
fn test_table_and_chains_created_once() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    setup_mocks(dir.path());

    let engine = NftCli;
    let first = ForwardIntent::new(AddrFamily::V4, 8080, "10.0.0.5".to_string(), None);
    let second = ForwardIntent::new(AddrFamily::V6, 443, "2001:db8::1".to_string(), Some(8443));

    forward::install(&engine, &first).unwrap();
    forward::install(&engine, &second).unwrap();

    let state = state_content();
    assert_eq!(state.matches("\"add\":{\"table\"").count(), 1);
    assert_eq!(state.matches("\"add\":{\"chain\"").count(), 2);
    // Two intents, four rules each
    assert_eq!(state.matches("\"add\":{\"rule\"").count(), 8);
}

#[test]
fn test_clear_flow() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    setup_mocks(dir.path());

    let engine = NftCli;

    // Nothing installed yet
    assert_eq!(table::clear(&engine).unwrap(), ClearOutcome::NothingToClear);

    let intent = ForwardIntent::new(AddrFamily::V4, 8080, "10.0.0.5".to_string(), None);
    forward::install(&engine, &intent).unwrap();

    assert_eq!(table::clear(&engine).unwrap(), ClearOutcome::Cleared);
    assert!(!engine.table_exists().unwrap());
    assert_eq!(table::clear(&engine).unwrap(), ClearOutcome::NothingToClear);
}

#[test]
fn test_persist_dumps_backs_up_and_restarts() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let settings = setup_mocks(dir.path());

    let engine = NftCli;
    let service = Systemctl;

    let intent = ForwardIntent::new(AddrFamily::V4, 8080, "10.0.0.5".to_string(), None);
    forward::install(&engine, &intent).unwrap();

    let report = persist::persist(&engine, &service, &settings).unwrap();
    assert!(report.backup.is_none());
    assert!(report.warnings.is_empty());

    let written = std::fs::read_to_string(&settings.nft_conf).unwrap();
    assert!(written.starts_with("#!/usr/sbin/nft -f"));
    assert!(written.contains("flush ruleset"));
    assert!(written.contains("\"addr\":\"10.0.0.5\""));

    let syslog = std::fs::read_to_string(dir.path().join("systemctl-log")).unwrap();
    assert!(syslog.contains("enable nftables"));
    assert!(syslog.contains("restart nftables"));

    // Second persist backs up the first dump
    let report = persist::persist(&engine, &service, &settings).unwrap();
    let backup = report.backup.expect("second persist should back up");
    assert!(backup.to_string_lossy().ends_with(".bak"));
    assert!(backup.exists());
}

#[test]
fn test_sysctl_reload_invokes_mock() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let settings = setup_mocks(dir.path());

    std::fs::write(&settings.sysctl_conf, "net.ipv4.ip_forward = 1\n").unwrap();
    ProcSysctl.reload(&settings.sysctl_conf).unwrap();

    let log = std::fs::read_to_string(dir.path().join("sysctl-log")).unwrap();
    assert!(log.contains("-p"));
    assert!(log.contains("sysctl.conf"));
}

#[test]
fn test_interactive_menu_against_mock_engine() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let settings = setup_mocks(dir.path());

    let engine = NftCli;
    let service = Systemctl;

    let input = "1\n8080\n10.0.0.5\n\n0\n";
    let mut output = Vec::new();
    Dispatcher::new(
        Cursor::new(input),
        &mut output,
        &engine,
        &service,
        &settings,
    )
    .run();

    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("forward 8080 -> 10.0.0.5:8080 installed and persisted"));

    assert!(state_content().contains("\"addr\":\"10.0.0.5\""));
    assert!(settings.nft_conf.exists());
}
