mod common;

use common::TestWorkspace;
use gompc_ingest::config::IngestConfig;
use gompc_ingest::context::IngestionContext;
use gompc_ingest::error::{IngestError, StoreError};
use gompc_ingest::pipeline::IngestionOrchestrator;
use gompc_ingest::store::{SqliteStore, TableStore};
use rusqlite::types::Value;

fn seeded_workspace() -> TestWorkspace {
    let workspace = TestWorkspace::new();
    workspace.write("FORD/REF-1/L42_2024_03_01_08_00_00.csv", &common::sample_export());
    workspace.write("RPLL/MATRIU/R100/L7_2024_03_02_09_30_00.csv", &common::sample_export());
    workspace.write("PTCOVER/4 RIVETS/CAV1/P9_2024_03_03_10_00_00.csv", &common::sample_export());
    workspace
}

fn snapshot(workspace: &TestWorkspace) -> Vec<Vec<Value>> {
    let store = SqliteStore::open(&workspace.db_path()).unwrap();
    let mut stmt = store
        .connection()
        .prepare(
            "SELECT id_referencia_some, id_element, valor, actual, nominal, ok, fase, created_at \
             FROM mesuresqualitat ORDER BY id_referencia_some, id_element",
        )
        .unwrap();
    stmt.query_map([], |row| (0..8).map(|i| row.get::<_, Value>(i)).collect())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn phase_of(workspace: &TestWorkspace, client: &str) -> String {
    SqliteStore::open(&workspace.db_path())
        .unwrap()
        .connection()
        .query_row(
            "SELECT fase FROM mesuresqualitat WHERE client = ?1 LIMIT 1",
            [client],
            |row| row.get(0),
        )
        .unwrap()
}

fn count_rows(workspace: &TestWorkspace) -> u64 {
    SqliteStore::open(&workspace.db_path())
        .unwrap()
        .count_rows("mesuresqualitat")
        .unwrap()
}

#[test]
fn full_run_writes_every_record() {
    let workspace = seeded_workspace();
    let summary = IngestionOrchestrator::new(workspace.config()).unwrap().run();

    assert!(summary.success, "{:?}", summary.errors);
    assert!(summary.errors.is_empty(), "{:?}", summary.errors);
    assert_eq!(summary.files_discovered, 3);
    assert_eq!(summary.csv_files_processed, 3);
    assert_eq!(summary.rows_read, 9);
    assert_eq!(summary.records_inserted, 9);
    assert_eq!(summary.table_rows_after, Some(9));
    assert_eq!(count_rows(&workspace), 9);

    assert_eq!(phase_of(&workspace, "RPLL"), "MATRIU");
    assert_eq!(phase_of(&workspace, "FORD"), "Unica");
    assert_eq!(phase_of(&workspace, "PTCOVER"), "Unica");
}

#[test]
fn rerunning_the_same_tree_is_idempotent() {
    let workspace = seeded_workspace();
    let orchestrator = IngestionOrchestrator::new(workspace.config()).unwrap();
    let first = orchestrator.run();
    let after_first = snapshot(&workspace);
    let second = orchestrator.run();
    assert!(first.success && second.success);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.records_inserted, 9);
    assert_eq!(second.table_rows_after, Some(9));
    assert_eq!(after_first.len(), 9);
    assert_eq!(snapshot(&workspace), after_first);
}

#[test]
fn injected_store_is_used() {
    let workspace = seeded_workspace();
    let summary = IngestionOrchestrator::new(workspace.config())
        .unwrap()
        .run_with(|| Ok(Box::new(SqliteStore::in_memory()?) as Box<dyn TableStore>));
    assert!(summary.success);
    assert_eq!(summary.records_inserted, 9);
    assert!(!workspace.db_path().exists());
}

#[test]
fn connection_failure_fails_the_run() {
    let workspace = seeded_workspace();
    let summary = IngestionOrchestrator::new(workspace.config())
        .unwrap()
        .run_with(|| Err(StoreError::UnsupportedTarget("offline".into())));
    assert!(!summary.success);
    assert_eq!(summary.records_inserted, 0);
    assert_eq!(summary.csv_files_processed, 3);
    assert!(summary.errors[0].contains("offline"), "{:?}", summary.errors);
}

#[test]
fn missing_root_is_a_discovery_failure() {
    let workspace = TestWorkspace::new();
    let config = IngestConfig {
        root: workspace.path().join("gone"),
        ..workspace.config()
    };
    let orchestrator = IngestionOrchestrator::new(config).unwrap();
    let mut ctx = IngestionContext::new();
    assert!(matches!(
        orchestrator.collect(&mut ctx),
        Err(IngestError::Discovery { .. })
    ));

    let summary = orchestrator.run();
    assert!(!summary.success);
    assert_eq!(summary.files_discovered, 0);
    assert_eq!(summary.errors.len(), 1);
}

#[test]
fn bad_files_are_counted_and_reported() {
    let workspace = seeded_workspace();
    workspace.write("FORD/REF-1/L43_2024_03_01_09_00_00.csv", "just one column\nvalue\n");
    workspace.write("FORD/REF-1/nodate.csv", &common::sample_export());

    let summary = IngestionOrchestrator::new(workspace.config()).unwrap().run();
    assert!(summary.success, "{:?}", summary.errors);
    assert_eq!(summary.files_discovered, 5);
    assert_eq!(summary.files_failed, 1);
    assert_eq!(summary.csv_files_processed, 4);
    assert_eq!(summary.records_inserted, 12);
    assert!(summary.errors.iter().any(|e| e.starts_with("Cannot parse")));
    assert!(summary.errors.iter().any(|e| e.contains("nodate.csv")));
}

#[test]
fn duplicate_keys_are_collapsed_before_writing() {
    let workspace = seeded_workspace();
    // Same client, reference and lot as the FORD file: identical keys.
    workspace.write("FORD/REF-1/L42_2024_03_01_09_00_00.csv", &common::sample_export());

    let summary = IngestionOrchestrator::new(workspace.config()).unwrap().run();
    assert!(summary.success, "{:?}", summary.errors);
    assert_eq!(summary.rows_normalized, 12);
    assert_eq!(summary.rows_deduplicated, 3);
    assert_eq!(summary.records_inserted, 9);
    assert_eq!(count_rows(&workspace), 9);
}

#[test]
fn expired_deadline_skips_remaining_files() {
    let workspace = seeded_workspace();
    let config = IngestConfig {
        deadline_secs: Some(0),
        ..workspace.config()
    };
    let summary = IngestionOrchestrator::new(config).unwrap().run();
    assert!(summary.success);
    assert_eq!(summary.files_discovered, 3);
    assert_eq!(summary.csv_files_processed, 0);
    assert_eq!(summary.records_inserted, 0);
    assert!(summary.errors.iter().any(|e| e.contains("3 file(s)")), "{:?}", summary.errors);
}

#[test]
fn dry_run_collects_without_connecting() {
    let workspace = seeded_workspace();
    let config = IngestConfig {
        dry_run: true,
        database: None,
        workers: 1,
        ..workspace.config()
    };
    let summary = IngestionOrchestrator::new(config)
        .unwrap()
        .run_with(|| panic!("dry runs never connect"));
    assert!(summary.success);
    assert!(summary.dry_run);
    assert_eq!(summary.rows_normalized, 9);
    assert_eq!(summary.records_inserted, 0);
    assert_eq!(summary.table_rows_after, None);
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let workspace = TestWorkspace::new();
    let config = IngestConfig {
        table: "bad table".into(),
        ..workspace.config()
    };
    assert!(matches!(
        IngestionOrchestrator::new(config),
        Err(IngestError::Config(_))
    ));
}
