//! Schema initialization and verification against the fake engine.

use graphmem_db::testing::FakeNeo4j;
use graphmem_db::{Connector, SchemaManager, SchemaScripts, CONSTRAINTS, INDEXES};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

fn connect(server: &FakeNeo4j) -> Connector {
    let mut conn = Connector::for_endpoint(
        &server.url,
        FakeNeo4j::DATABASE,
        FakeNeo4j::USER,
        FakeNeo4j::PASSWORD,
        Duration::from_secs(5),
    );
    conn.connect();
    conn
}

#[test]
fn initialize_creates_everything() {
    let server = FakeNeo4j::start();
    let conn = connect(&server);
    let schema = SchemaManager::new(&conn);

    assert!(schema.initialize_schema());
    assert_eq!(server.constraint_names().len(), CONSTRAINTS.len());
    assert_eq!(server.index_names().len(), INDEXES.len());
    assert_eq!(server.node_count("AgentType"), 5);
    assert!(schema.verify_schema());
}

#[test]
fn initialize_twice_changes_nothing() {
    let server = FakeNeo4j::start();
    let conn = connect(&server);
    let schema = SchemaManager::new(&conn);

    assert!(schema.initialize_schema());
    let constraints = server.constraint_names();
    let indexes = server.index_names();

    assert!(schema.initialize_schema());
    assert_eq!(server.constraint_names(), constraints);
    assert_eq!(server.index_names(), indexes);
    assert_eq!(server.node_count("AgentType"), 5);
}

#[test]
fn verify_names_dropped_constraint() {
    let server = FakeNeo4j::start();
    let conn = connect(&server);
    let schema = SchemaManager::new(&conn);
    assert!(schema.initialize_schema());

    conn.execute_write("DROP CONSTRAINT memory_id", &Value::Null)
        .unwrap();

    let report = schema.verify().unwrap();
    assert_eq!(report.missing_constraints, vec!["memory_id".to_owned()]);
    assert!(report.missing_indexes.is_empty());
    assert!(!schema.verify_schema());

    assert!(schema.initialize_schema());
    assert!(schema.verify_schema());
}

#[test]
fn verify_on_empty_database_reports_all_missing() {
    let server = FakeNeo4j::start();
    let conn = connect(&server);
    let report = SchemaManager::new(&conn).verify().unwrap();
    assert_eq!(report.missing_constraints.len(), 3);
    assert_eq!(report.missing_indexes.len(), 3);
    assert_eq!(report.agent_types, 0);
    assert!(!report.is_complete());
}

#[test]
fn unguarded_scripts_tolerate_existing_items() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("01_constraints.cypher"),
        "CREATE CONSTRAINT memory_id\nFOR (m:Memory) REQUIRE m.id IS UNIQUE;\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("02_indexes.cypher"),
        "CREATE INDEX memory_type\nFOR (m:Memory) ON (m.memory_type);\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("03_seed_agent_types.cypher"), "// none\n").unwrap();

    let server = FakeNeo4j::start();
    let conn = connect(&server);
    let scripts = SchemaScripts::load_dir(dir.path()).unwrap();
    let schema = SchemaManager::with_scripts(&conn, scripts);
    assert!(schema.initialize_schema());
    assert!(schema.initialize_schema());
    assert_eq!(server.constraint_names(), vec!["memory_id".to_owned()]);
}

#[test]
fn other_failures_are_fatal_but_later_statements_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("01_constraints.cypher"),
        "CREATE CONSTRAINT broken IF NOT EXISTS;\nCREATE CONSTRAINT project_id IF NOT EXISTS\nFOR (p:Project) REQUIRE p.id IS UNIQUE;\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("02_indexes.cypher"), "").unwrap();
    std::fs::write(dir.path().join("03_seed_agent_types.cypher"), "").unwrap();

    let server = FakeNeo4j::start();
    let conn = connect(&server);
    let schema =
        SchemaManager::with_scripts(&conn, SchemaScripts::load_dir(dir.path()).unwrap());
    assert!(!schema.initialize_schema());
    assert_eq!(server.constraint_names(), vec!["project_id".to_owned()]);
}

#[test]
fn shipped_script_directory_matches_builtin() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schema");
    let loaded = SchemaScripts::load_dir(&dir).unwrap();
    let builtin = SchemaScripts::builtin();
    let a: Vec<_> = loaded.statements().collect();
    let b: Vec<_> = builtin.statements().collect();
    assert_eq!(a, b);
}

#[test]
fn status_lists_schema_and_counts() {
    let server = FakeNeo4j::start();
    let conn = connect(&server);
    let schema = SchemaManager::new(&conn);
    assert!(schema.initialize_schema());
    conn.execute_write(
        "CREATE (m:Memory {id: $id, content: $content})",
        &serde_json::json!({"id": "m-1", "content": "x"}),
    )
    .unwrap();

    let status = schema.schema_status();
    assert!(status.error.is_none());
    assert!(status.constraints.contains(&"memory_id".to_owned()));
    assert!(status.indexes.contains(&"memory_type".to_owned()));
    assert_eq!(status.node_counts.get("AgentType"), Some(&5));
    assert_eq!(status.node_counts.get("Memory"), Some(&1));

    let json = serde_json::to_value(&status).unwrap();
    assert!(json.get("generated_at").is_some());
    assert!(json.get("error").is_none());
}

#[test]
fn status_reports_error_when_unreachable() {
    let server = FakeNeo4j::start();
    let conn = connect(&server);
    server.set_available(false);
    let status = SchemaManager::new(&conn).schema_status();
    assert!(status.error.is_some());
    assert!(status.constraints.is_empty());
    assert!(!SchemaManager::new(&conn).verify_schema());
}

#[test]
fn unique_constraint_enforced_after_initialize() {
    let server = FakeNeo4j::start();
    let conn = connect(&server);
    assert!(SchemaManager::new(&conn).initialize_schema());
    let params = serde_json::json!({"id": "dup", "content": "a"});
    conn.execute_write("CREATE (m:Memory {id: $id, content: $content})", &params)
        .unwrap();
    let err = conn
        .execute_write("CREATE (m:Memory {id: $id, content: $content})", &params)
        .unwrap_err();
    assert_eq!(
        err.code(),
        Some("Neo.ClientError.Schema.ConstraintValidationFailed")
    );
}
