//! Smoke tests -- verify the binary runs and the operator commands work
//! against a real on-disk store.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Continuous validation orchestrator",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("clusterdoctor"));
}

#[test]
fn test_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("validation.db");
    let db = db.to_str().unwrap();

    for _ in 0..2 {
        Command::cargo_bin("clusterdoctor")
            .unwrap()
            .args(["init", "--db", db])
            .assert()
            .success()
            .stdout(predicates::str::contains("Initialized DB"));
    }
}

#[test]
fn test_add_status_history_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("validation.db");
    let db = db.to_str().unwrap();

    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args([
            "add", "--db", db, "--node", "hgx-01", "--test", "dl_test", "--result", "pass",
            "--timestamp", "1704234000",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("Inserted 1 run"));

    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args(["status", "--db", db, "--node", "hgx-01"])
        .assert()
        .success()
        .stdout(predicates::str::contains("hgx-01\tdl_test"))
        .stdout(predicates::str::contains("pass"));

    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args(["history", "--db", db, "--tail", "5"])
        .assert()
        .success()
        .stdout(predicates::str::contains("hgx-01"));
}

#[test]
fn test_add_rejects_invalid_result() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("validation.db");

    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args([
            "add",
            "--db",
            db.to_str().unwrap(),
            "--node",
            "hgx-01",
            "--test",
            "dl_test",
            "--result",
            "maybe",
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("pass, fail, incomplete"));
}

#[test]
fn test_export_csv() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("validation.db");
    let out = dir.path().join("status.csv");

    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args([
            "add", "--db", db.to_str().unwrap(), "--node", "hgx-01", "--test", "nccl",
            "--result", "fail", "--timestamp", "1704234000",
        ])
        .assert()
        .success();

    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args([
            "export",
            "--db",
            db.to_str().unwrap(),
            "--format",
            "csv",
            "--out",
            out.to_str().unwrap(),
        ])
        .assert()
        .success();

    let body = std::fs::read_to_string(&out).unwrap();
    assert!(body.starts_with("node,test,latest_timestamp,result"));
    assert!(body.contains("hgx-01,nccl"));
}

#[test]
fn test_pairs_verify_even_count() {
    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args(["pairs", "--nitems", "8", "--format", "csv", "--verify"])
        .assert()
        .success()
        .stdout(predicates::str::contains("round,a,b"))
        .stderr(predicates::str::contains("OK"));
}

#[test]
fn test_pairs_requires_participants() {
    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args(["pairs", "--nitems", "1"])
        .assert()
        .failure();
}

#[test]
fn test_orchestrate_subcommand_exists() {
    Command::cargo_bin("clusterdoctor")
        .unwrap()
        .args(["orchestrate", "--help"])
        .assert()
        .success();
}
