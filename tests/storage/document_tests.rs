//! DocumentStore contract tests.

use serde_json::{json, Value};

use tenantstore::interfaces::{ErrorKind, EventKind, Persister};
use tenantstore::model::{document_id, ListParams, ACCOUNT_FIELD};
use tenantstore::publisher::mock::RecordingPublisher;
use tenantstore::query::parse_query;

use super::{doc, provision, root, teardown, unique_name, user};

fn ids(docs: &[tenantstore::model::Document]) -> Vec<String> {
    docs.iter()
        .filter_map(|d| document_id(d).map(str::to_string))
        .collect()
}

// =============================================================================
// Create / read
// =============================================================================

pub async fn test_create_and_get<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "docs").await;
    let auth = user("acct-a");

    let created = store
        .create_document(&auth, &base.name, "items", doc(json!({"name": "first", "tags": ["x"]})))
        .await
        .expect("create_document should succeed");

    let id = document_id(&created).expect("id should be assigned").to_string();
    assert_eq!(created[ACCOUNT_FIELD], json!("acct-a"));

    let fetched = store
        .get_document_by_id(&auth, &base.name, "items", &id)
        .await
        .unwrap();
    assert_eq!(fetched, created);

    let err = store
        .get_document_by_id(&auth, &base.name, "items", "missing")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    teardown(store, &customer, &base).await;
}

pub async fn test_caller_id_and_conflict<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "ids").await;
    let auth = user("acct-a");

    let created = store
        .create_document(&auth, &base.name, "items", doc(json!({"id": "custom-1", "n": 1})))
        .await
        .unwrap();
    assert_eq!(document_id(&created), Some("custom-1"));

    let err = store
        .create_document(&auth, &base.name, "items", doc(json!({"id": "custom-1", "n": 2})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // The account is always the caller's.
    let stamped = store
        .create_document(&auth, &base.name, "items", doc(json!({"accountId": "forged"})))
        .await
        .unwrap();
    assert_eq!(stamped[ACCOUNT_FIELD], json!("acct-a"));

    teardown(store, &customer, &base).await;
}

pub async fn test_account_isolation<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "iso").await;
    let owner = user("acct-owner");
    let other = user("acct-other");

    let created = store
        .create_document(&owner, &base.name, "notes", doc(json!({"text": "mine"})))
        .await
        .unwrap();
    let id = document_id(&created).unwrap().to_string();

    let err = store
        .get_document_by_id(&other, &base.name, "notes", &id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let listed = store
        .list_documents(&other, &base.name, "notes", &ListParams::default())
        .await
        .unwrap();
    assert_eq!(listed.total, 0);

    let err = store
        .update_document(&other, &base.name, "notes", &id, doc(json!({"text": "theirs"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(
        store
            .delete_document(&other, &base.name, "notes", &id)
            .await
            .unwrap(),
        0
    );

    // Root sees every account's documents.
    let fetched = store
        .get_document_by_id(&root(), &base.name, "notes", &id)
        .await
        .unwrap();
    assert_eq!(fetched["text"], json!("mine"));

    teardown(store, &customer, &base).await;
}

pub async fn test_base_isolation<P: Persister>(store: &P) {
    let (customer_a, base_a) = provision(store, "iso_a").await;
    let (customer_b, base_b) = provision(store, "iso_b").await;
    let auth = user("acct-shared");

    store
        .create_document(&auth, &base_a.name, "items", doc(json!({"id": "shared", "n": 1})))
        .await
        .unwrap();
    store
        .create_document(&auth, &base_b.name, "items", doc(json!({"id": "other"})))
        .await
        .unwrap();

    // Not even root reaches across bases.
    let err = store
        .get_document_by_id(&root(), &base_b.name, "items", "shared")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let listed = store
        .list_documents(&root(), &base_b.name, "items", &ListParams::default())
        .await
        .unwrap();
    assert_eq!(ids(&listed.results), vec!["other"]);

    let filter = parse_query(&json!([["id", "=", "shared"]])).unwrap();
    let queried = store
        .query_documents(&root(), &base_b.name, "items", &filter, &ListParams::default())
        .await
        .unwrap();
    assert!(queried.results.is_empty());

    // The same id is free in the other base.
    store
        .create_document(&auth, &base_b.name, "items", doc(json!({"id": "shared", "n": 2})))
        .await
        .unwrap();
    let a = store
        .get_document_by_id(&auth, &base_a.name, "items", "shared")
        .await
        .unwrap();
    assert_eq!(a["n"], json!(1));

    teardown(store, &customer_a, &base_a).await;
    teardown(store, &customer_b, &base_b).await;
}

// =============================================================================
// Listing and queries
// =============================================================================

pub async fn test_list_paging_and_sort<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "page").await;
    let auth = user("acct-a");

    for (id, rank) in [("d1", 3), ("d2", 1), ("d3", 5), ("d4", 2), ("d5", 4)] {
        store
            .create_document(&auth, &base.name, "ranked", doc(json!({"id": id, "rank": rank})))
            .await
            .unwrap();
    }

    let first = store
        .list_documents(&auth, &base.name, "ranked", &ListParams::page(1, 2))
        .await
        .unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.page, 1);
    assert_eq!(first.size, 2);
    assert_eq!(ids(&first.results), vec!["d1", "d2"]);

    let last = store
        .list_documents(&auth, &base.name, "ranked", &ListParams::page(3, 2))
        .await
        .unwrap();
    assert_eq!(ids(&last.results), vec!["d5"]);

    let by_rank = store
        .list_documents(
            &auth,
            &base.name,
            "ranked",
            &ListParams::page(1, 10).sorted_by("rank", true),
        )
        .await
        .unwrap();
    assert_eq!(ids(&by_rank.results), vec!["d3", "d5", "d1", "d4", "d2"]);

    let empty = store
        .list_documents(&auth, &base.name, "never_written", &ListParams::default())
        .await
        .unwrap();
    assert_eq!(empty.total, 0);
    assert!(empty.results.is_empty());

    teardown(store, &customer, &base).await;
}

pub async fn test_query_range_over_mixed_types<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "range").await;
    let auth = user("acct-a");

    let values = [
        ("r1", json!({"value": 50})),
        ("r2", json!({"value": 150})),
        ("r3", json!({"value": "200"})),
        ("r4", json!({"value": [10, 300]})),
        ("r5", json!({"other": true})),
    ];
    for (id, body) in values {
        let mut body = doc(body);
        body.insert("id".to_string(), Value::String(id.to_string()));
        store
            .create_document(&auth, &base.name, "mixed", body)
            .await
            .unwrap();
    }

    let filter = parse_query(&json!([["value", ">", 100]])).unwrap();
    let found = store
        .query_documents(&auth, &base.name, "mixed", &filter, &ListParams::default())
        .await
        .unwrap();
    assert_eq!(found.total, 2);
    assert_eq!(ids(&found.results), vec!["r2", "r4"]);

    let filter = parse_query(&json!([["value", ">=", "150"]])).unwrap();
    let found = store
        .query_documents(&auth, &base.name, "mixed", &filter, &ListParams::default())
        .await
        .unwrap();
    assert_eq!(ids(&found.results), vec!["r3"]);

    teardown(store, &customer, &base).await;
}

pub async fn test_query_membership_and_or<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "query").await;
    let auth = user("acct-a");

    for (id, status, priority) in [
        ("q1", "open", 1),
        ("q2", "closed", 2),
        ("q3", "open", 3),
        ("q4", "archived", 4),
    ] {
        store
            .create_document(
                &auth,
                &base.name,
                "tickets",
                doc(json!({"id": id, "status": status, "priority": priority})),
            )
            .await
            .unwrap();
    }

    let filter = parse_query(&json!([["status", "in", ["closed", "archived"]]])).unwrap();
    let found = store
        .query_documents(&auth, &base.name, "tickets", &filter, &ListParams::default())
        .await
        .unwrap();
    assert_eq!(ids(&found.results), vec!["q2", "q4"]);

    let filter = parse_query(&json!([
        ["status", "=", "open"],
        "and",
        ["priority", ">", 1]
    ]))
    .unwrap();
    let found = store
        .query_documents(&auth, &base.name, "tickets", &filter, &ListParams::default())
        .await
        .unwrap();
    assert_eq!(ids(&found.results), vec!["q3"]);

    let filter = parse_query(&json!([
        ["priority", "=", 1],
        "or",
        ["status", "=", "archived"]
    ]))
    .unwrap();
    let found = store
        .query_documents(&auth, &base.name, "tickets", &filter, &ListParams::default())
        .await
        .unwrap();
    assert_eq!(ids(&found.results), vec!["q1", "q4"]);

    let filter = parse_query(&json!([["status", "!=", "open"]])).unwrap();
    let found = store
        .query_documents(&auth, &base.name, "tickets", &filter, &ListParams::default())
        .await
        .unwrap();
    assert_eq!(found.total, 2);

    teardown(store, &customer, &base).await;
}

// =============================================================================
// Mutations
// =============================================================================

pub async fn test_update_merges<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "upd").await;
    let auth = user("acct-a");

    let created = store
        .create_document(&auth, &base.name, "items", doc(json!({"a": 1, "b": "keep"})))
        .await
        .unwrap();
    let id = document_id(&created).unwrap().to_string();

    let updated = store
        .update_document(
            &auth,
            &base.name,
            "items",
            &id,
            doc(json!({"a": 2, "c": true, "id": "ignored"})),
        )
        .await
        .unwrap();
    assert_eq!(updated["a"], json!(2));
    assert_eq!(updated["b"], json!("keep"));
    assert_eq!(updated["c"], json!(true));
    assert_eq!(document_id(&updated), Some(id.as_str()));

    let err = store
        .update_document(&auth, &base.name, "items", "missing", doc(json!({"a": 3})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    teardown(store, &customer, &base).await;
}

pub async fn test_document_keys_rejected<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "keys").await;
    let auth = user("acct-a");

    for bad in [json!({"a.b": 1}), json!({"$inc": {"n": 1}})] {
        let err = store
            .create_document(&auth, &base.name, "items", doc(bad.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "create {}", bad);
    }

    let created = store
        .create_document(&auth, &base.name, "items", doc(json!({"a": {"b": 1}})))
        .await
        .unwrap();
    let id = document_id(&created).unwrap().to_string();

    let err = store
        .update_document(&auth, &base.name, "items", &id, doc(json!({"a.b": 2})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let unchanged = store
        .get_document_by_id(&auth, &base.name, "items", &id)
        .await
        .unwrap();
    assert_eq!(unchanged["a"], json!({"b": 1}));
    assert!(!unchanged.contains_key("a.b"));

    teardown(store, &customer, &base).await;
}

pub async fn test_concurrent_increments<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "incr").await;
    let auth = user("acct-a");

    store
        .create_document(&auth, &base.name, "counters", doc(json!({"id": "c1", "hits": 0})))
        .await
        .unwrap();

    let increments = (0..50).map(|_| {
        store.increment_value(&auth, &base.name, "counters", "c1", "hits", 1)
    });
    for result in futures::future::join_all(increments).await {
        result.expect("increment should succeed");
    }

    let counter = store
        .get_document_by_id(&auth, &base.name, "counters", "c1")
        .await
        .unwrap();
    assert_eq!(counter["hits"].as_i64(), Some(50));

    // A missing field starts from zero.
    store
        .increment_value(&auth, &base.name, "counters", "c1", "misses", -2)
        .await
        .unwrap();
    let counter = store
        .get_document_by_id(&auth, &base.name, "counters", "c1")
        .await
        .unwrap();
    assert_eq!(counter["misses"].as_i64(), Some(-2));

    let err = store
        .increment_value(&auth, &base.name, "counters", "absent", "hits", 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    teardown(store, &customer, &base).await;
}

pub async fn test_increment_non_numeric<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "nan").await;
    let auth = user("acct-a");

    store
        .create_document(&auth, &base.name, "counters", doc(json!({"id": "c1", "label": "x"})))
        .await
        .unwrap();

    let err = store
        .increment_value(&auth, &base.name, "counters", "c1", "label", 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = store
        .increment_value(&auth, &base.name, "counters", "c1", "id", 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    teardown(store, &customer, &base).await;
}

pub async fn test_delete_document<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "del").await;
    let auth = user("acct-a");

    store
        .create_document(&auth, &base.name, "items", doc(json!({"id": "gone"})))
        .await
        .unwrap();

    assert_eq!(
        store
            .delete_document(&auth, &base.name, "items", "gone")
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .delete_document(&auth, &base.name, "items", "gone")
            .await
            .unwrap(),
        0
    );

    teardown(store, &customer, &base).await;
}

pub async fn test_bulk_create<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "bulk").await;
    let auth = user("acct-a");

    let batch = (0..10).map(|n| doc(json!({"n": n}))).collect();
    store
        .bulk_create_documents(&auth, &base.name, "batch", batch)
        .await
        .unwrap();
    let listed = store
        .list_documents(&auth, &base.name, "batch", &ListParams::default())
        .await
        .unwrap();
    assert_eq!(listed.total, 10);

    store
        .create_document(&auth, &base.name, "clash", doc(json!({"id": "taken"})))
        .await
        .unwrap();
    let err = store
        .bulk_create_documents(
            &auth,
            &base.name,
            "clash",
            vec![doc(json!({"id": "fresh"})), doc(json!({"id": "taken"}))],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let listed = store
        .list_documents(&auth, &base.name, "clash", &ListParams::default())
        .await
        .unwrap();
    assert_eq!(listed.total, 1, "a failed batch stores nothing");

    teardown(store, &customer, &base).await;
}

// =============================================================================
// Collections and indexes
// =============================================================================

pub async fn test_create_index_and_list_collections<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "idx").await;

    store
        .create_index(&base.name, "testindex", "idxfield")
        .await
        .unwrap();
    store
        .create_index(&base.name, "testindex", "idxfield")
        .await
        .expect("creating an existing index should be a no-op");

    let collections = store.list_collections(&base.name).await.unwrap();
    assert!(collections.contains(&"testindex".to_string()));
    assert!(collections.iter().all(|c| !c.starts_with("sb_")));

    teardown(store, &customer, &base).await;
}

pub async fn test_reserved_collection_rejected<P: Persister>(store: &P) {
    let base = unique_name("resv");
    let err = store
        .create_document(&user("acct-a"), &base, "sb_tasks", doc(json!({})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = store
        .list_documents(&user("acct-a"), &base, "Bad Name", &ListParams::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// =============================================================================
// Change events
// =============================================================================

pub async fn test_change_events<P: Persister>(store: &P, publisher: &RecordingPublisher) {
    let (customer, base) = provision(store, "events").await;
    let auth = user("acct-a");
    let collection = unique_name("feed");
    let channel = format!("db-{}", collection);

    store
        .create_document(&auth, &base.name, &collection, doc(json!({"id": "e1"})))
        .await
        .unwrap();
    store
        .update_document(&auth, &base.name, &collection, "e1", doc(json!({"x": 1})))
        .await
        .unwrap();
    store
        .delete_document(&auth, &base.name, &collection, "e1")
        .await
        .unwrap();
    store
        .delete_document(&auth, &base.name, &collection, "e1")
        .await
        .unwrap();

    let events = publisher.events_for(&channel);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Created, EventKind::Updated, EventKind::Deleted]
    );
    assert_eq!(events[1].payload["x"], json!(1));
    assert_eq!(events[2].payload, json!("e1"));

    // A failing publisher never fails the write.
    publisher.set_fail_on_publish(true);
    let result = store
        .create_document(&auth, &base.name, &collection, doc(json!({"id": "e2"})))
        .await;
    publisher.set_fail_on_publish(false);
    assert!(result.is_ok());

    teardown(store, &customer, &base).await;
}

/// Run every document test against a store.
#[macro_export]
macro_rules! run_document_tests {
    ($store:expr) => {
        use $crate::storage::document_tests::*;

        test_create_and_get($store).await;
        println!("  test_create_and_get: PASSED");

        test_caller_id_and_conflict($store).await;
        println!("  test_caller_id_and_conflict: PASSED");

        test_account_isolation($store).await;
        println!("  test_account_isolation: PASSED");

        test_base_isolation($store).await;
        println!("  test_base_isolation: PASSED");

        // listing and queries
        test_list_paging_and_sort($store).await;
        println!("  test_list_paging_and_sort: PASSED");

        test_query_range_over_mixed_types($store).await;
        println!("  test_query_range_over_mixed_types: PASSED");

        test_query_membership_and_or($store).await;
        println!("  test_query_membership_and_or: PASSED");

        // mutations
        test_update_merges($store).await;
        println!("  test_update_merges: PASSED");

        test_document_keys_rejected($store).await;
        println!("  test_document_keys_rejected: PASSED");

        test_concurrent_increments($store).await;
        println!("  test_concurrent_increments: PASSED");

        test_increment_non_numeric($store).await;
        println!("  test_increment_non_numeric: PASSED");

        test_delete_document($store).await;
        println!("  test_delete_document: PASSED");

        test_bulk_create($store).await;
        println!("  test_bulk_create: PASSED");

        // collections
        test_create_index_and_list_collections($store).await;
        println!("  test_create_index_and_list_collections: PASSED");

        test_reserved_collection_rejected($store).await;
        println!("  test_reserved_collection_rejected: PASSED");
    };
}
