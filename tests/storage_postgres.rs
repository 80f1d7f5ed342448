//! PostgreSQL storage contract tests using testcontainers.
//!
//! Run with: cargo test --test storage_postgres -- --ignored --nocapture
//!
//! Each test starts PostgreSQL in a container, migrates the catalog and
//! runs one suite against it.

mod storage;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

use tenantstore::interfaces::Persister;
use tenantstore::publisher::mock::RecordingPublisher;
use tenantstore::storage::PostgresPersister;

/// Start PostgreSQL container.
///
/// Returns (container, connection_string).
async fn start_postgres() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    // The ready message is printed once by the init process and once by
    // the real server; the sleep below covers the gap.
    let image = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ));

    let container = image
        .with_env_var("POSTGRES_USER", "tenantstore")
        .with_env_var("POSTGRES_PASSWORD", "tenantstore")
        .with_env_var("POSTGRES_DB", "tenantstore")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let host_port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let connection_string = format!(
        "postgres://tenantstore:tenantstore@{}:{}/tenantstore",
        host, host_port
    );
    println!("PostgreSQL available at: {}", connection_string);
    (container, connection_string)
}

/// Connect and migrate the catalog.
async fn connect(connection_string: &str) -> (PostgresPersister, Arc<RecordingPublisher>) {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(connection_string)
        .await
        .expect("Failed to connect to PostgreSQL");

    let publisher = Arc::new(RecordingPublisher::new());
    let store = PostgresPersister::new(pool, "sb", publisher.clone())
        .expect("Failed to create PostgreSQL persister");
    let reports = store.migrate().await.expect("Failed to run migrations");
    assert_eq!(reports[0].partition, "sb");
    (store, publisher)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_catalog() {
    println!("=== PostgreSQL TenantCatalog Tests ===");
    println!("Starting PostgreSQL container...");
    let (_container, connection_string) = start_postgres().await;
    let (store, _) = connect(&connection_string).await;

    run_catalog_tests!(&store);

    store.close().await;
    println!("=== All PostgreSQL TenantCatalog tests PASSED ===");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_documents() {
    println!("=== PostgreSQL DocumentStore Tests ===");
    println!("Starting PostgreSQL container...");
    let (_container, connection_string) = start_postgres().await;
    let (store, publisher) = connect(&connection_string).await;

    run_document_tests!(&store);
    test_change_events(&store, &publisher).await;
    println!("  test_change_events: PASSED");

    store.close().await;
    println!("=== All PostgreSQL DocumentStore tests PASSED ===");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_system_tables() {
    println!("=== PostgreSQL Task/File/Function Tests ===");
    println!("Starting PostgreSQL container...");
    let (_container, connection_string) = start_postgres().await;
    let (store, _) = connect(&connection_string).await;

    run_system_tests!(&store);

    store.close().await;
    println!("=== All PostgreSQL Task/File/Function tests PASSED ===");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_base_partition_lifecycle() {
    use tenantstore::interfaces::{ErrorKind, TaskStore};
    use tenantstore::migration::MigrationSet;

    println!("=== PostgreSQL Base Partition Tests ===");
    println!("Starting PostgreSQL container...");
    let (_container, connection_string) = start_postgres().await;
    let (store, _) = connect(&connection_string).await;
    let (customer, base) = storage::provision(&store, "part").await;

    // Every multi-statement tenant unit ran and was recorded.
    for table in ["sb_tasks", "sb_files", "sb_functions"] {
        let exists: bool = sqlx::query_scalar(
            "SELECT to_regclass(format('%I.%I', $1::text, $2::text)) IS NOT NULL",
        )
        .bind(&base.name)
        .bind(table)
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert!(exists, "{} should exist in {}", table, base.name);
    }
    let recorded: i64 = sqlx::query_scalar(&format!(
        "SELECT count(*) FROM \"{}\".sb_migrations",
        base.name
    ))
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(recorded as usize, MigrationSet::tenant().len());
    assert!(store.migrate_base(&base.name).await.unwrap().is_noop());
    println!("  tenant migrations applied: PASSED");

    // A partition that was never provisioned is not an empty one.
    let err = store
        .list_tasks_by_base("never_provisioned")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Neither is an active base whose task table is gone.
    sqlx::query(&format!("DROP TABLE \"{}\".sb_tasks", base.name))
        .execute(store.pool())
        .await
        .unwrap();
    let err = store.list_tasks_by_base(&base.name).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = store.list_tasks().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    println!("  missing task table surfaces: PASSED");

    storage::teardown(&store, &customer, &base).await;
    store.close().await;
    println!("=== All PostgreSQL Base Partition tests PASSED ===");
}
