//! In-memory storage engine.
//!
//! Backs the `memory` storage type and every unit test that needs a
//! Persister. Filters are evaluated with [`crate::query::matches`], so the
//! results agree with what the database engines return.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::helpers::validate_base_name;
use crate::id::new_id;
use crate::interfaces::{
    ChangePublisher, Persister, Result, StorageError, TaskStore, TenantCatalog,
};
use crate::migration::MigrationReport;
use crate::model::{Base, Customer, Document, File, FunctionInfo, Task};

mod documents;
mod system;

/// Contents of one base.
#[derive(Default)]
struct Partition {
    collections: BTreeMap<String, BTreeMap<String, Document>>,
    indexes: BTreeSet<(String, String)>,
    tasks: BTreeMap<String, Task>,
    files: HashMap<String, File>,
    functions: BTreeMap<String, FunctionInfo>,
}

/// Persister that keeps everything in process memory.
pub struct MockPersister {
    customers: RwLock<HashMap<String, Customer>>,
    bases: RwLock<HashMap<String, Base>>,
    partitions: RwLock<HashMap<String, Partition>>,
    publisher: Arc<dyn ChangePublisher>,
    fail_on_list_tasks: RwLock<Option<String>>,
}

impl MockPersister {
    pub fn new(publisher: Arc<dyn ChangePublisher>) -> Self {
        Self {
            customers: RwLock::new(HashMap::new()),
            bases: RwLock::new(HashMap::new()),
            partitions: RwLock::new(HashMap::new()),
            publisher,
            fail_on_list_tasks: RwLock::new(None),
        }
    }

    /// Make `list_tasks_by_base` fail for `base`.
    pub async fn set_fail_on_list_tasks(&self, base: Option<&str>) {
        *self.fail_on_list_tasks.write().await = base.map(str::to_string);
    }

    /// Whether a partition holds anything for `base`.
    pub async fn partition_exists(&self, base: &str) -> bool {
        self.partitions.read().await.contains_key(base)
    }

    /// Indexes recorded for a collection.
    pub async fn indexes(&self, base: &str, collection: &str) -> Vec<String> {
        self.partitions
            .read()
            .await
            .get(base)
            .map(|p| {
                p.indexes
                    .iter()
                    .filter(|(c, _)| c == collection)
                    .map(|(_, f)| f.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TenantCatalog for MockPersister {
    async fn create_customer(&self, mut customer: Customer) -> Result<Customer> {
        customer.email = customer.email.to_lowercase();
        let mut customers = self.customers.write().await;
        if customers.values().any(|c| c.email == customer.email) {
            return Err(StorageError::conflict("customer", customer.email));
        }
        customer.id = new_id();
        customers.insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn create_base(&self, mut base: Base) -> Result<Base> {
        validate_base_name(&base.name)?;
        let mut bases = self.bases.write().await;
        if bases.values().any(|b| b.name == base.name) {
            return Err(StorageError::conflict("base", base.name));
        }
        base.id = new_id();
        bases.insert(base.id.clone(), base.clone());
        self.partitions
            .write()
            .await
            .entry(base.name.clone())
            .or_default();
        Ok(base)
    }

    async fn find_account(&self, customer_id: &str) -> Result<Customer> {
        self.customers
            .read()
            .await
            .get(customer_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("customer", customer_id))
    }

    async fn find_database(&self, base_id: &str) -> Result<Base> {
        self.bases
            .read()
            .await
            .get(base_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("base", base_id))
    }

    async fn list_databases(&self) -> Result<Vec<Base>> {
        let mut active: Vec<Base> = self
            .bases
            .read()
            .await
            .values()
            .filter(|b| b.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn get_customer_by_stripe_id(&self, stripe_id: &str) -> Result<Customer> {
        self.customers
            .read()
            .await
            .values()
            .find(|c| c.stripe_id == stripe_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("customer", stripe_id))
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        let email = email.to_lowercase();
        Ok(self
            .customers
            .read()
            .await
            .values()
            .any(|c| c.email == email))
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.bases.read().await.values().any(|b| b.name == name))
    }

    async fn increment_monthly_email_sent(&self, base_id: &str) -> Result<()> {
        let mut bases = self.bases.write().await;
        let base = bases
            .get_mut(base_id)
            .ok_or_else(|| StorageError::not_found("base", base_id))?;
        base.monthly_email_sent += 1;
        Ok(())
    }

    async fn activate_customer(&self, customer_id: &str) -> Result<()> {
        {
            let mut customers = self.customers.write().await;
            let customer = customers
                .get_mut(customer_id)
                .ok_or_else(|| StorageError::not_found("customer", customer_id))?;
            customer.is_active = true;
        }

        let mut bases = self.bases.write().await;
        for base in bases.values_mut().filter(|b| b.customer_id == customer_id) {
            base.is_active = true;
        }
        Ok(())
    }

    async fn delete_customer(&self, base_name: &str, email: &str) -> Result<()> {
        validate_base_name(base_name)?;
        self.partitions.write().await.remove(base_name);

        let email = email.to_lowercase();
        self.bases.write().await.retain(|_, b| b.name != base_name);
        self.customers.write().await.retain(|_, c| c.email != email);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MockPersister {
    async fn list_tasks_by_base(&self, base: &str) -> Result<Vec<Task>> {
        if self.fail_on_list_tasks.read().await.as_deref() == Some(base) {
            return Err(StorageError::Backend(format!(
                "simulated failure reading tasks of '{}'",
                base
            )));
        }
        validate_base_name(base)?;
        Ok(self
            .partitions
            .read()
            .await
            .get(base)
            .map(|p| p.tasks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_task(&self, base: &str, mut task: Task) -> Result<Task> {
        validate_base_name(base)?;
        task.id = new_id();
        task.base_name = base.to_string();
        self.partitions
            .write()
            .await
            .entry(base.to_string())
            .or_default()
            .tasks
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn delete_task(&self, base: &str, id: &str) -> Result<()> {
        self.partitions
            .write()
            .await
            .get_mut(base)
            .and_then(|p| p.tasks.remove(id))
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("task", id))
    }
}

#[async_trait]
impl Persister for MockPersister {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn migrate(&self) -> Result<Vec<MigrationReport>> {
        Ok(Vec::new())
    }

    async fn close(&self) {}
}
