use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

#[test]
fn status_reports_paths_and_overrides() {
    let tmp = tempdir().expect("tempdir");

    let assert = assert_cmd::cargo::cargo_bin_cmd!("session-recall")
        .current_dir(tmp.path())
        .env("RECALL_HOME", tmp.path())
        .env("RECALL_TRANSCRIPTS_DIR", tmp.path().join("absent"))
        .env("RECALL_EXPORT_BIN", tmp.path().join("no-such-bin"))
        .env("RECALL_SEARCH_LIMIT", "7")
        .args(["status", "--json"])
        .assert()
        .success();

    let report: Value = serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(report["command"], "status");
    assert_eq!(report["ok"], true);
    let details: Vec<&str> = report["details"]
        .as_array()
        .expect("details")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(details.contains(&"search.default_limit=7"));
    assert!(details.contains(&"stored_sessions=0"));
    assert!(details.contains(&"last_sync=never"));
    assert!(details.contains(&"env.RECALL_SEARCH_LIMIT=7"));
    assert!(details.iter().any(|d| d.starts_with("export_bin unavailable")));
    assert!(details.iter().any(|d| d.starts_with("transcripts dir missing")));
}

#[test]
fn status_flags_unreadable_store() {
    let tmp = tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join("store")).expect("mkdir");
    fs::write(tmp.path().join("store/sessions.jsonl"), "{not json}\n").expect("write");

    assert_cmd::cargo::cargo_bin_cmd!("session-recall")
        .current_dir(tmp.path())
        .env("RECALL_HOME", tmp.path())
        .env("RECALL_EXPORT_ENABLED", "false")
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("issue: session store unreadable"));
}

#[test]
fn invalid_config_is_reported() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("config.toml"), "[search]\ndefault_limit = 0\n").expect("write");

    assert_cmd::cargo::cargo_bin_cmd!("session-recall")
        .current_dir(tmp.path())
        .env("RECALL_HOME", tmp.path())
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("search default limit must be >= 1"));
}
