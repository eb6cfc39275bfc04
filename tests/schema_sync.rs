use gompc_ingest::context::IngestionContext;
use gompc_ingest::error::IngestionIssue;
use gompc_ingest::record::RECORD_COLUMNS;
use gompc_ingest::schema::{SchemaState, SchemaSynchronizer};
use gompc_ingest::store::{SqliteStore, TableStore};

fn index_names(store: &SqliteStore) -> Vec<String> {
    let mut stmt = store
        .connection()
        .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn absent_table_is_created_with_indexes() {
    let mut store = SqliteStore::in_memory().unwrap();
    let mut ctx = IngestionContext::new();
    let mut sync = SchemaSynchronizer::new("mesuresqualitat");
    assert_eq!(sync.state(), &SchemaState::Unknown);

    let schema = sync.synchronize(&mut store, &mut ctx).unwrap();
    assert_eq!(schema.columns.len(), RECORD_COLUMNS.len());
    assert!(schema.has_column("ID_REFERENCIA_SOME"));
    assert!(matches!(sync.state(), SchemaState::Present(_)));
    assert!(ctx.issues().is_empty());
    assert_eq!(
        index_names(&store),
        vec![
            "idx_mesuresqualitat_client",
            "idx_mesuresqualitat_data_hora",
            "idx_mesuresqualitat_fase",
            "idx_mesuresqualitat_lot",
            "idx_mesuresqualitat_maquina",
            "idx_mesuresqualitat_referencia_client",
        ]
    );
}

#[test]
fn missing_columns_are_added_without_touching_data() {
    let mut store = SqliteStore::in_memory().unwrap();
    store
        .execute(
            "CREATE TABLE legacy (id_referencia_some TEXT NOT NULL, id_element TEXT NOT NULL, \
             actual REAL, extra_note TEXT, PRIMARY KEY (id_referencia_some, id_element)); \
             INSERT INTO legacy VALUES ('A_B_C', 'E_P', 1.5, 'keep me');",
        )
        .unwrap();

    let mut ctx = IngestionContext::new();
    let schema = SchemaSynchronizer::new("legacy")
        .synchronize(&mut store, &mut ctx)
        .unwrap();

    assert!(ctx.issues().is_empty(), "{:?}", ctx.issues());
    for (name, _) in RECORD_COLUMNS {
        assert!(schema.has_column(name), "{name} missing");
    }
    assert!(schema.has_column("extra_note"));
    let (actual, note, machine): (f64, String, String) = store
        .connection()
        .query_row("SELECT actual, extra_note, maquina FROM legacy", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap();
    assert_eq!(actual, 1.5);
    assert_eq!(note, "keep me");
    assert_eq!(machine, "gompc");
}

#[test]
fn synchronizing_twice_is_a_no_op() {
    let mut store = SqliteStore::in_memory().unwrap();
    let mut ctx = IngestionContext::new();
    let first = SchemaSynchronizer::new("m").synchronize(&mut store, &mut ctx).unwrap();
    store
        .execute("INSERT INTO m (id_referencia_some, id_element, actual) VALUES ('k', 'e', 2.0)")
        .unwrap();
    let second = SchemaSynchronizer::new("m").synchronize(&mut store, &mut ctx).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.count_rows("m").unwrap(), 1);
    assert!(ctx.issues().is_empty());
}

#[test]
fn failing_index_is_recorded_and_skipped() {
    let mut store = SqliteStore::in_memory().unwrap();
    // A view named like one of the indexes makes that CREATE INDEX fail.
    store
        .execute("CREATE TABLE m (id_referencia_some TEXT, id_element TEXT); CREATE VIEW idx_m_fase AS SELECT 1;")
        .unwrap();
    let mut ctx = IngestionContext::new();
    let schema = SchemaSynchronizer::new("m").synchronize(&mut store, &mut ctx).unwrap();
    assert!(schema.has_column("fase"));
    assert_eq!(ctx.issues().len(), 1);
    assert!(matches!(
        &ctx.issues()[0],
        IngestionIssue::Schema { statement, .. } if statement.contains("idx_m_fase")
    ));
}
