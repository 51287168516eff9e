#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn mxlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mxlink"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("mxlink should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    stdout(output)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect()
}

#[test]
fn echo_default_payload_round_trips() {
    let output = mxlink(&["echo", "--timeout", "100ms"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["size"], 3);
    assert_eq!(lines[0]["matched"], true);
}

#[test]
fn echo_repeats_in_poll_mode() {
    let output = mxlink(&["echo", "--data", "hello", "--repeat", "3", "--mode", "poll"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l["payload"] == "hello"));
}

#[test]
fn echo_max_params() {
    let output = mxlink(&["echo", "--size", "2494", "--timeout", "2s"]);
    assert!(output.status.success());
    assert_eq!(json_lines(&output)[0]["size"], 2494);
}

#[test]
fn echo_oversize_returns_60() {
    let output = mxlink(&["echo", "--size", "2495"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("too large"));
}

#[test]
fn version_request_prints_firmware_string() {
    let output = mxlink(&["request", "0x0003"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["api_name"], "sys.version");
    assert!(lines[0]["response"].as_str().unwrap().starts_with("mxlink-sim"));
}

#[test]
fn silent_request_times_out_with_124() {
    let output = mxlink(&["request", "1", "--params", "010203", "--silent", "--timeout", "50ms"]);
    assert_eq!(output.status.code(), Some(124));
    assert!(stdout(&output).is_empty());
}

#[test]
fn event_id_is_not_a_command() {
    let output = mxlink(&["request", "0x8101"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn bad_duration_is_usage_error() {
    let output = mxlink(&["echo", "--timeout", "later"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn header_valid_and_invalid() {
    let ok = mxlink(&["header", "0b0500faff000000"]);
    assert!(ok.status.success());
    let lines = json_lines(&ok);
    assert_eq!(lines[0]["kind_name"], "READ");
    assert_eq!(lines[0]["len"], 5);
    assert_eq!(lines[0]["valid"], true);

    let bad = mxlink(&["header", "0b0500fbff000000"]);
    assert_eq!(bad.status.code(), Some(60));
    let lines = json_lines(&bad);
    assert_eq!(lines[0]["valid"], false);
    assert_eq!(lines[0]["length_consistent"], false);
}

#[test]
fn monitor_prints_injected_events() {
    let output = mxlink(&[
        "monitor",
        "--inject",
        "sta-got-ip,bypass,reboot",
        "--interval",
        "20ms",
        "--count",
        "3",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["kind"], "wifi_status");
    assert_eq!(lines[0]["status"], "sta_got_ip");
    assert_eq!(lines[0]["interface"], "station");
    assert_eq!(lines[1]["kind"], "bypass_input");
    assert_eq!(lines[1]["len"], 18);
    assert_eq!(lines[2]["kind"], "reboot");
    assert_eq!(lines[2]["seq"], 3);
}

#[test]
fn monitor_in_poll_mode() {
    let output = mxlink(&["monitor", "--inject", "ap-up", "--count", "1", "--mode", "poll"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["status"], "ap_up");
    assert_eq!(lines[0]["interface"], "soft_ap");
}

#[test]
fn version_extended_lists_limits() {
    let output = mxlink(&["version", "--extended"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("name: mxlink"));
    assert!(text.contains("max_ipc_params: 2494"));
}
