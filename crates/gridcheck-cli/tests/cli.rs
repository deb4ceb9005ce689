use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join(relative)
}

fn gridcheck() -> Command {
    Command::cargo_bin("gridcheck").unwrap()
}

#[test]
fn run_writes_results_and_prints_summary() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("results");
    gridcheck()
        .args([
            "run",
            repo_path("test_data/gridcheck/three_bus.json").to_str().unwrap(),
            "--contingencies",
            repo_path("test_data/gridcheck/contingencies").to_str().unwrap(),
            "--bus-scope",
            repo_path("test_data/gridcheck/bus_scope.csv").to_str().unwrap(),
            "--config",
            repo_path("test_data/gridcheck/study.toml").to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("BASE_CASE"))
        .stdout(predicate::str::contains("Outage-A"))
        .stdout(predicate::str::contains("Outage-B"))
        .stdout(predicate::str::contains("3 of 3 rows fully compliant"));

    for name in ["summary.csv", "steady_voltage.csv", "circuit_loading.csv", "report.json"] {
        assert!(out.join(name).exists(), "{name} missing");
    }
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("report.json")).unwrap()).unwrap();
    assert_eq!(report["case"], "three_bus");
    assert_eq!(report["summary"][1]["contingency"], "Outage-A");
    assert_eq!(report["summary"][1]["message"], "Convergent");
}

#[test]
fn run_fails_on_missing_case() {
    let tmp = tempdir().unwrap();
    gridcheck()
        .args([
            "run",
            tmp.path().join("nope.json").to_str().unwrap(),
            "--contingencies",
            repo_path("test_data/gridcheck/contingencies").to_str().unwrap(),
            "--out",
            tmp.path().join("results").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load case"));
}

#[test]
fn validate_lists_contingencies() {
    gridcheck()
        .args([
            "validate",
            "--contingencies",
            repo_path("test_data/gridcheck/contingencies").to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("circuit-switching"))
        .stdout(predicate::str::contains("2 contingencies valid"));
}

#[test]
fn validate_rejects_reserved_name() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("contingencies.yaml");
    fs::write(&path, "- name: BASE_CASE\n").unwrap();
    gridcheck()
        .args(["validate", "--contingencies", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reserved"));
}

#[test]
fn batch_runs_every_case_and_writes_manifest() {
    let tmp = tempdir().unwrap();
    let batch = tmp.path().join("batch.toml");
    fs::write(
        &batch,
        format!(
            "contingencies = {:?}\nthreads = 2\n\n\
             [[cases]]\nid = \"winter\"\ncase = {:?}\n\n\
             [[cases]]\nid = \"broken\"\ncase = \"missing.json\"\n",
            repo_path("test_data/gridcheck/contingencies").to_str().unwrap(),
            repo_path("test_data/gridcheck/three_bus.json").to_str().unwrap(),
        ),
    )
    .unwrap();

    gridcheck()
        .args(["batch", batch.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("1 ok, 1 failed"))
        .stderr(predicate::str::contains("1 of 2 cases failed"));

    let manifest: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(tmp.path().join("results/batch_manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["num_cases"], 2);
    assert_eq!(manifest["cases"][0]["status"], "ok");
    assert_eq!(manifest["cases"][1]["status"], "error");
    assert!(tmp.path().join("results/winter/summary.csv").exists());
}
