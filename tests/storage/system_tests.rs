//! Task, file, function and migration contract tests.

use serde_json::json;

use tenantstore::interfaces::{ErrorKind, Persister};
use tenantstore::model::{File, FunctionInfo, Task};

use super::{provision, teardown};

// =============================================================================
// Tasks
// =============================================================================

pub async fn test_tasks<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "tasks").await;

    let mut task = Task::new("nightly", "function", "cleanup", "@daily");
    task.meta = json!({"retries": 3});
    let added = store.add_task(&base.name, task).await.unwrap();
    assert!(!added.id.is_empty());
    assert_eq!(added.base_name, base.name);

    let listed = store.list_tasks_by_base(&base.name).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "nightly");
    assert_eq!(listed[0].meta, json!({"retries": 3}));
    assert_eq!(listed[0].base_name, base.name);

    let all = store.list_tasks().await.unwrap();
    assert!(all.iter().any(|t| t.id == added.id));

    store.delete_task(&base.name, &added.id).await.unwrap();
    assert!(store.list_tasks_by_base(&base.name).await.unwrap().is_empty());

    let err = store.delete_task(&base.name, &added.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    teardown(store, &customer, &base).await;
}

// =============================================================================
// Files
// =============================================================================

pub async fn test_files<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "files").await;

    let id = store
        .add_file(
            &base.name,
            File::new("acct-a", "uploads/logo.png", "https://cdn.example.com/logo.png", 2048),
        )
        .await
        .unwrap();

    let file = store.get_file_by_id(&base.name, &id).await.unwrap();
    assert_eq!(file.id, id);
    assert_eq!(file.key, "uploads/logo.png");
    assert_eq!(file.size, 2048);
    assert_eq!(file.account_id, "acct-a");

    store.delete_file(&base.name, &id).await.unwrap();
    let err = store.get_file_by_id(&base.name, &id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = store.delete_file(&base.name, &id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    teardown(store, &customer, &base).await;
}

// =============================================================================
// Functions
// =============================================================================

pub async fn test_functions<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "funcs").await;

    let resize = store
        .add_function(&base.name, FunctionInfo::new("resize", "db-images", "v1"))
        .await
        .unwrap();
    store
        .add_function(&base.name, FunctionInfo::new("audit", "db-orders", "v1"))
        .await
        .unwrap();

    let err = store
        .add_function(&base.name, FunctionInfo::new("resize", "db-other", "v1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let before = store.get_function_by_name(&base.name, "resize").await.unwrap();
    assert_eq!(before.id, resize);
    assert_eq!(before.version, 1);

    store
        .update_function(&base.name, &resize, "v2", "db-thumbs")
        .await
        .unwrap();
    let after = store.get_function_by_name(&base.name, "resize").await.unwrap();
    assert_eq!(after.code, "v2");
    assert_eq!(after.trigger_topic, "db-thumbs");
    assert_eq!(after.version, 2);
    assert!(after.last_updated >= before.last_updated);

    let err = store
        .update_function(&base.name, "missing", "v3", "db-x")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let names: Vec<String> = store
        .list_functions(&base.name)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["audit", "resize"]);

    store.delete_function(&base.name, "audit").await.unwrap();
    let err = store.delete_function(&base.name, "audit").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = store
        .get_function_by_name(&base.name, "audit")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    teardown(store, &customer, &base).await;
}

// =============================================================================
// Lifecycle
// =============================================================================

pub async fn test_ping_and_migrate_idempotent<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "migr").await;

    store.ping().await.expect("ping should succeed");

    store.migrate().await.expect("first migrate should succeed");
    let second = store.migrate().await.expect("second migrate should succeed");
    assert!(
        second.iter().all(|report| report.is_noop()),
        "re-running migrations should apply nothing: {:?}",
        second
    );

    teardown(store, &customer, &base).await;
}

/// Run every system-table test against a store.
#[macro_export]
macro_rules! run_system_tests {
    ($store:expr) => {
        use $crate::storage::system_tests::*;

        test_tasks($store).await;
        println!("  test_tasks: PASSED");

        test_files($store).await;
        println!("  test_files: PASSED");

        test_functions($store).await;
        println!("  test_functions: PASSED");

        test_ping_and_migrate_idempotent($store).await;
        println!("  test_ping_and_migrate_idempotent: PASSED");
    };
}
