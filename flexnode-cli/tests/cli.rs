use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

const VALID_CONFIG: &str = r#"{
    "azure": {
        "subscriptionId": "00000000-0000-0000-0000-000000000000",
        "tenantId": "11111111-1111-1111-1111-111111111111",
        "targetCluster": { "name": "flex", "resourceGroup": "flex-rg" }
    },
    "arc": { "location": "eastus", "resourceGroup": "flex-rg" },
    "kubernetes": { "version": "1.29.4" },
    "containerd": { "version": "1.7.20" }
}"#;

fn flexnode() -> Command {
    Command::cargo_bin("flexnode").unwrap()
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn help_lists_subcommands() {
    flexnode()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bootstrap"))
        .stdout(predicate::str::contains("unbootstrap"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn bootstrap_fails_on_missing_config() {
    flexnode()
        .args(["bootstrap", "--config", "/nonexistent/flexnode.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("flexnode.json"));
}

#[test]
fn unbootstrap_fails_on_missing_config() {
    flexnode()
        .args(["unbootstrap", "--config", "/nonexistent/flexnode.json"])
        .assert()
        .failure();
}

#[test]
fn bootstrap_rejects_invalid_config() {
    let file = write_config(r#"{ "azure": { "subscriptionId": "" } }"#);
    flexnode()
        .args(["bootstrap", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn bootstrap_rejects_v_prefixed_kubernetes_version() {
    let file = write_config(&VALID_CONFIG.replace("1.29.4", "v1.29.4"));
    flexnode()
        .args(["bootstrap", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("leading 'v'"));
}

#[test]
fn status_reports_json_on_unprovisioned_host() {
    let file = write_config(VALID_CONFIG);
    let output = flexnode()
        .args(["status", "--json", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert!(parsed.get("machineName").is_some());
    assert!(parsed.get("arc").is_some());
}

#[test]
fn unknown_subcommand_is_rejected() {
    flexnode().arg("reprovision").assert().failure();
}
