#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn gpctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gpctl"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("gpctl should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_str(stdout(output).trim()).expect("stdout should be JSON")
}

#[test]
fn version_prints_package_version() {
    let output = gpctl(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        format!("gpctl {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn commands_lists_encoded_payloads() {
    let output = gpctl(&["commands", "--role", "settings", "--format", "json"]);
    assert!(output.status.success());

    let listed = json(&output);
    assert_eq!(
        listed,
        serde_json::json!([{ "name": "keep-alive", "role": "settings", "payload": "03 5b 01 42" }])
    );
}

#[test]
fn fragment_splits_at_mtu() {
    let payload = "ab".repeat(45);
    let output = gpctl(&["fragment", &payload, "--mtu", "20", "--format", "json"]);
    assert!(output.status.success());

    let report = json(&output);
    let lens: Vec<u64> = report["fragments"]
        .as_array()
        .expect("fragments should be an array")
        .iter()
        .map(|f| f["len"].as_u64().expect("len should be a number"))
        .collect();
    assert_eq!(lens, vec![20, 20, 5]);
}

#[test]
fn decode_applies_status_bundle() {
    let output = gpctl(&["decode", "08930046014d010101", "--format", "json"]);
    assert!(output.status.success());

    let report = json(&output);
    assert_eq!(report["state"]["battery"], 77);
    assert_eq!(report["state"]["recording"], true);
    assert_eq!(report["messages"][0]["command_id"], "0x93");
}

#[test]
fn decode_malformed_frame_is_data_invalid() {
    let output = gpctl(&["decode", "60", "--format", "json"]);
    assert_eq!(output.status.code(), Some(60));
    assert_eq!(
        json(&output)["dropped"].as_array().map(Vec::len),
        Some(1)
    );
}

#[test]
fn decode_rejects_bad_hex() {
    let output = gpctl(&["decode", "zz"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid hex"));
}

#[test]
fn simulate_record_and_stop() {
    let output = gpctl(&[
        "simulate",
        "record,stop,battery",
        "--no-poll",
        "--step",
        "50ms",
        "--format",
        "json",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = json(&output);
    assert_eq!(report["steps"][2]["result"], "battery 87%");
    assert_eq!(report["state"]["recording"], false);
    assert_eq!(report["state"]["model"], "HERO-SIM");
}

#[test]
fn simulate_unconfirmed_stop_times_out() {
    let output = gpctl(&[
        "simulate",
        "record,highlight-restart",
        "--ignore-stop",
        "--stop-timeout",
        "200ms",
        "--no-poll",
        "--step",
        "50ms",
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr).contains("highlight-restart"));
}

#[test]
fn simulate_rejects_unknown_preset() {
    let output = gpctl(&["simulate", "preset=bogus"]);
    assert_eq!(output.status.code(), Some(2));
}
