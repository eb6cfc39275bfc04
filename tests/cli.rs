mod common;

use std::fs;

use assert_cmd::Command;
use common::TestWorkspace;
use predicates::str::contains;
use serde_json::Value;

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("gompc-ingest").expect("binary exists");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn seeded_workspace() -> TestWorkspace {
    let workspace = TestWorkspace::new();
    workspace.write("FORD/REF-1/L42_2024_03_01_08_00_00.csv", &common::sample_export());
    workspace.write("RPLL/MATRIU/R100/L7_2024_03_02_09_30_00.csv", &common::sample_export());
    workspace
}

#[test]
fn schema_prints_sqlite_ddl() {
    bin()
        .args(["schema", "--dialect", "sqlite", "--table", "m"])
        .assert()
        .success()
        .stdout(contains("CREATE TABLE IF NOT EXISTS m ("))
        .stdout(contains("PRIMARY KEY (id_referencia_some, id_element)"))
        .stdout(contains("CREATE INDEX IF NOT EXISTS idx_m_fase ON m (fase);"));
}

#[test]
fn schema_defaults_to_postgres() {
    bin()
        .arg("schema")
        .assert()
        .success()
        .stdout(contains("CREATE TABLE IF NOT EXISTS mesuresqualitat ("))
        .stdout(contains("numeric(15,6)"));
}

#[test]
fn schema_rejects_unsafe_table_names() {
    bin()
        .args(["schema", "--table", "m;drop"])
        .assert()
        .failure()
        .stderr(contains("not a plain SQL identifier"));
}

#[test]
fn ingest_reports_json_summary() {
    let workspace = seeded_workspace();
    let url = format!("sqlite://{}", workspace.db_path().display());
    let output = bin()
        .args(["ingest", "--json", "--reference-year", "2024", "--database-url", &url, "--root"])
        .arg(workspace.path())
        .output()
        .expect("runs");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: Value = serde_json::from_slice(&output.stdout).expect("json summary");
    assert_eq!(summary["success"], Value::Bool(true));
    assert_eq!(summary["csv_files_processed"], 2);
    assert_eq!(summary["records_inserted"], 6);
    assert_eq!(summary["table_rows_after"], 6);
    assert!(summary["errors"].as_array().unwrap().is_empty());
    assert!(summary["run_id"].as_str().unwrap().len() >= 32);
}

#[test]
fn ingest_prints_a_summary_table() {
    let workspace = seeded_workspace();
    let url = format!("sqlite://{}", workspace.db_path().display());
    bin()
        .args(["ingest", "--database-url", &url, "--root"])
        .arg(workspace.path())
        .assert()
        .success()
        .stdout(contains("records_inserted"))
        .stdout(contains("csv_files_processed"));
}

#[test]
fn unreachable_database_fails_the_run() {
    let workspace = seeded_workspace();
    let url = format!("sqlite://{}", workspace.path().join("missing/dir/spc.db").display());
    bin()
        .args(["ingest", "--json", "--database-url", &url, "--root"])
        .arg(workspace.path())
        .assert()
        .failure()
        .stdout(contains("\"success\": false"))
        .stderr(contains("Cannot connect"));
}

#[test]
fn unsupported_database_url_is_rejected() {
    let workspace = seeded_workspace();
    bin()
        .args(["ingest", "--database-url", "mysql://db/spc", "--root"])
        .arg(workspace.path())
        .assert()
        .failure()
        .stderr(contains("--database-url"));
}

#[test]
fn dry_run_exports_normalized_records() {
    let workspace = seeded_workspace();
    let export = workspace.path().join("out.csv");
    bin()
        .args(["ingest", "--dry-run", "--export"])
        .arg(&export)
        .arg("--root")
        .arg(workspace.path())
        .assert()
        .success();

    let contents = fs::read_to_string(&export).expect("export written");
    let mut lines = contents.lines();
    assert!(lines.next().unwrap().starts_with("id_referencia_some;id_element;valor"));
    assert_eq!(lines.count(), 6);
    assert!(contents.contains("FORD_REF-1_L42;Circle 1_Diameter;12.050000"));
    assert!(!workspace.db_path().exists());
}

#[test]
fn export_with_missing_root_reports_a_failed_summary() {
    let workspace = TestWorkspace::new();
    let export = workspace.path().join("out.csv");
    let output = bin()
        .args(["ingest", "--dry-run", "--json", "--export"])
        .arg(&export)
        .arg("--root")
        .arg(workspace.path().join("gone"))
        .output()
        .expect("runs");
    assert!(!output.status.success());

    let summary: Value = serde_json::from_slice(&output.stdout).expect("json summary");
    assert_eq!(summary["success"], Value::Bool(false));
    assert_eq!(summary["files_discovered"], 0);
    let errors = summary["errors"].as_array().unwrap();
    assert!(errors[0].as_str().unwrap().contains("Cannot open root directory"));
    assert!(!export.exists());
}

#[test]
fn scan_lists_discovered_files() {
    let workspace = seeded_workspace();
    bin()
        .args(["scan", "--reference-year", "2024", "--root"])
        .arg(workspace.path())
        .assert()
        .success()
        .stdout(contains("FORD"))
        .stdout(contains("phased"))
        .stdout(contains("L42_2024_03_01_08_00_00.csv"));
}

#[test]
fn parse_prints_normalized_records() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("L42_2024_03_01_08_00_00.csv", &common::sample_export());
    bin()
        .args(["parse", "--client", "FORD", "--reference", "REF-1", "-i"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("FORD_REF-1_L42"))
        .stdout(contains("Plane Delta_Flatness"));
}

#[test]
fn config_prints_effective_yaml() {
    bin()
        .args(["config", "--root", "/share", "--batch-size", "500"])
        .assert()
        .success()
        .stdout(contains("batch_size: 500"))
        .stdout(contains("table: mesuresqualitat"));
}

#[test]
fn config_round_trips_through_a_file() {
    let workspace = TestWorkspace::new();
    let path = workspace.path().join("ingest.yaml");
    bin()
        .args(["config", "--table", "spc_measures", "-o"])
        .arg(&path)
        .assert()
        .success();
    bin()
        .args(["config", "-c"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("table: spc_measures"));
}
