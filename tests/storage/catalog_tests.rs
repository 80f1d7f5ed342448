//! TenantCatalog contract tests.

use serde_json::json;

use tenantstore::interfaces::{ErrorKind, Persister};
use tenantstore::model::{Base, Customer};

use super::{doc, provision, teardown, unique_name, user};

// =============================================================================
// Customers
// =============================================================================

pub async fn test_create_and_find_customer<P: Persister>(store: &P) {
    let name = unique_name("cust");
    let customer = store
        .create_customer(Customer::new(
            format!("{}@Example.COM", name),
            format!("cus_{}", name),
            "sub_1",
        ))
        .await
        .expect("create_customer should succeed");

    assert!(!customer.id.is_empty(), "identifier should be assigned");
    assert_eq!(customer.email, format!("{}@example.com", name));

    let found = store.find_account(&customer.id).await.unwrap();
    assert_eq!(found.email, customer.email);
    assert!(!found.is_active);

    let by_stripe = store
        .get_customer_by_stripe_id(&format!("cus_{}", name))
        .await
        .unwrap();
    assert_eq!(by_stripe.id, customer.id);

    assert!(store
        .email_exists(&format!("{}@EXAMPLE.com", name))
        .await
        .unwrap());
    assert!(!store
        .email_exists(&format!("{}-other@example.com", name))
        .await
        .unwrap());
}

pub async fn test_duplicate_email_conflicts<P: Persister>(store: &P) {
    let email = format!("{}@example.com", unique_name("dup"));
    store
        .create_customer(Customer::new(&email, "cus_a", "sub_a"))
        .await
        .unwrap();

    let err = store
        .create_customer(Customer::new(email.to_uppercase(), "cus_b", "sub_b"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

pub async fn test_find_missing_customer<P: Persister>(store: &P) {
    let err = store.find_account("no-such-customer").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store
        .get_customer_by_stripe_id("cus_no_such")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// Bases
// =============================================================================

pub async fn test_create_base_and_exists<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "base").await;

    assert!(store.database_exists(&base.name).await.unwrap());
    assert!(!store
        .database_exists(&unique_name("absent"))
        .await
        .unwrap());

    let found = store.find_database(&base.id).await.unwrap();
    assert_eq!(found.name, base.name);
    assert_eq!(found.customer_id, customer.id);
    assert_eq!(found.monthly_email_sent, 0);

    let err = store
        .create_base(Base::new(&customer.id, &base.name))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    teardown(store, &customer, &base).await;
}

pub async fn test_reserved_base_names_rejected<P: Persister>(store: &P) {
    for name in ["admin", "public", "pg_catalog", "Bad-Name", "1st"] {
        let result = store.create_base(Base::new("someone", name)).await;
        assert_eq!(
            result.unwrap_err().kind(),
            ErrorKind::Validation,
            "base name {:?} should be rejected",
            name
        );
    }
}

pub async fn test_list_databases_only_active<P: Persister>(store: &P) {
    let name = unique_name("inactive");
    let customer = store
        .create_customer(Customer::new(
            format!("{}@example.com", name),
            format!("cus_{}", name),
            "sub_1",
        ))
        .await
        .unwrap();
    let inactive = store
        .create_base(Base::new(&customer.id, &name))
        .await
        .unwrap();

    let listed = store.list_databases().await.unwrap();
    assert!(listed.iter().all(|b| b.is_active));
    assert!(!listed.iter().any(|b| b.id == inactive.id));

    store.activate_customer(&customer.id).await.unwrap();

    let listed = store.list_databases().await.unwrap();
    assert!(listed.iter().any(|b| b.id == inactive.id));
    assert!(store.find_account(&customer.id).await.unwrap().is_active);
    assert!(
        listed.windows(2).all(|w| w[0].id <= w[1].id),
        "bases should be ordered by id"
    );

    teardown(store, &customer, &inactive).await;
}

pub async fn test_activate_missing_customer<P: Persister>(store: &P) {
    let err = store
        .activate_customer("no-such-customer")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

pub async fn test_increment_monthly_email_sent<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "mail").await;

    let increments = (0..20).map(|_| store.increment_monthly_email_sent(&base.id));
    for result in futures::future::join_all(increments).await {
        result.expect("increment should succeed");
    }
    assert_eq!(
        store.find_database(&base.id).await.unwrap().monthly_email_sent,
        20
    );

    let err = store
        .increment_monthly_email_sent("no-such-base")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    teardown(store, &customer, &base).await;
}

pub async fn test_delete_customer_removes_everything<P: Persister>(store: &P) {
    let (customer, base) = provision(store, "gone").await;
    store
        .create_document(&user("acct-gone"), &base.name, "orders", doc(json!({"n": 1})))
        .await
        .unwrap();
    assert_eq!(
        store.list_collections(&base.name).await.unwrap(),
        vec!["orders".to_string()]
    );

    store
        .delete_customer(&base.name, &customer.email.to_uppercase())
        .await
        .unwrap();

    assert!(!store.database_exists(&base.name).await.unwrap());
    assert!(!store.email_exists(&customer.email).await.unwrap());
    assert!(store.list_collections(&base.name).await.unwrap().is_empty());
    let err = store.find_database(&base.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Run every catalog test against a store.
#[macro_export]
macro_rules! run_catalog_tests {
    ($store:expr) => {
        use $crate::storage::catalog_tests::*;

        // customers
        test_create_and_find_customer($store).await;
        println!("  test_create_and_find_customer: PASSED");

        test_duplicate_email_conflicts($store).await;
        println!("  test_duplicate_email_conflicts: PASSED");

        test_find_missing_customer($store).await;
        println!("  test_find_missing_customer: PASSED");

        // bases
        test_create_base_and_exists($store).await;
        println!("  test_create_base_and_exists: PASSED");

        test_reserved_base_names_rejected($store).await;
        println!("  test_reserved_base_names_rejected: PASSED");

        test_list_databases_only_active($store).await;
        println!("  test_list_databases_only_active: PASSED");

        test_activate_missing_customer($store).await;
        println!("  test_activate_missing_customer: PASSED");

        test_increment_monthly_email_sent($store).await;
        println!("  test_increment_monthly_email_sent: PASSED");

        test_delete_customer_removes_everything($store).await;
        println!("  test_delete_customer_removes_everything: PASSED");
    };
}
