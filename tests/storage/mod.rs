//! Shared Persister contract tests.
//!
//! Every storage engine runs the same suites. Each test binary builds its
//! engine and invokes the `run_*_tests!` macros against it.

pub mod catalog_tests;
pub mod document_tests;
pub mod system_tests;

use serde_json::Value;

use tenantstore::interfaces::Persister;
use tenantstore::model::{Base, Customer, Document, Principal, ROOT_ROLE};

/// A base or collection name no earlier run has used.
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::now_v7().simple())
}

pub fn user(account: &str) -> Principal {
    Principal::new(account, format!("user-{}", account), "user@example.com", 0)
}

pub fn root() -> Principal {
    Principal::new("root-account", "root", "root@example.com", ROOT_ROLE)
}

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("test document must be an object")
}

/// Create a customer owning one active base.
pub async fn provision<P: Persister>(store: &P, prefix: &str) -> (Customer, Base) {
    let name = unique_name(prefix);
    let customer = store
        .create_customer(Customer::new(
            format!("{}@example.com", name),
            format!("cus_{}", name),
            "sub_test",
        ))
        .await
        .expect("create_customer should succeed");
    let base = store
        .create_base(Base::new(&customer.id, &name).active(true))
        .await
        .expect("create_base should succeed");
    (customer, base)
}

/// Drop everything `provision` created.
pub async fn teardown<P: Persister>(store: &P, customer: &Customer, base: &Base) {
    store
        .delete_customer(&base.name, &customer.email)
        .await
        .expect("delete_customer should succeed");
}
