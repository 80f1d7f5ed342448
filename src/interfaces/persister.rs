//! Persister contract and storage error taxonomy.
//!
//! Every storage engine implements the same set of traits. Callers hold an
//! `Arc<dyn Persister>` chosen once at start and never branch on which
//! engine is behind it.

use async_trait::async_trait;

use crate::migration::MigrationReport;
use crate::model::{
    Base, Customer, Document, File, FunctionInfo, ListParams, PagedResult, Principal, Task,
};
use crate::query::Filter;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Migration {version} failed on partition '{partition}': {message}")]
    Migration {
        partition: String,
        version: u32,
        message: String,
    },

    #[error("Partition '{base}' was dropped but its catalog entries remain: {message}")]
    OrphanedCatalog { base: String, message: String },
}

/// Coarse classification of a [`StorageError`].
///
/// Retry policy lives with the caller; only `Backend` failures are ever
/// candidates for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Backend,
    Migration,
}

impl StorageError {
    pub fn validation(message: impl Into<String>) -> Self {
        StorageError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl Into<String>) -> Self {
        StorageError::Conflict {
            entity,
            key: key.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Validation(_) => ErrorKind::Validation,
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::Conflict { .. } => ErrorKind::Conflict,
            StorageError::Migration { .. } => ErrorKind::Migration,
            _ => ErrorKind::Backend,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// System catalog of customers and bases.
///
/// All operations address the catalog partition, never a tenant partition,
/// except `delete_customer` which also destroys the tenant partition.
#[async_trait]
pub trait TenantCatalog: Send + Sync {
    /// Persist a new customer. The identifier is assigned here.
    async fn create_customer(&self, customer: Customer) -> Result<Customer>;

    /// Persist a new base. Callers check `database_exists` first.
    async fn create_base(&self, base: Base) -> Result<Base>;

    async fn find_account(&self, customer_id: &str) -> Result<Customer>;

    async fn find_database(&self, base_id: &str) -> Result<Base>;

    /// Active bases only.
    async fn list_databases(&self) -> Result<Vec<Base>>;

    async fn get_customer_by_stripe_id(&self, stripe_id: &str) -> Result<Customer>;

    async fn email_exists(&self, email: &str) -> Result<bool>;

    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// Single-statement increment of the base's monthly email counter.
    async fn increment_monthly_email_sent(&self, base_id: &str) -> Result<()>;

    /// Activate a customer and every base it owns.
    ///
    /// Issued as two bounded updates back-to-back (customer, then bases).
    /// A reader between the two can observe the customer active while its
    /// bases are still inactive.
    async fn activate_customer(&self, customer_id: &str) -> Result<()>;

    /// Drop the physical partition of `base_name`, then remove the catalog
    /// rows for `email` and `base_name`.
    ///
    /// A catalog failure after the drop is reported as
    /// [`StorageError::OrphanedCatalog`].
    async fn delete_customer(&self, base_name: &str, email: &str) -> Result<()>;
}

/// Document operations inside one base's partition.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store a document, assigning an identifier when absent.
    async fn create_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        doc: Document,
    ) -> Result<Document>;

    /// Store many documents; either all are stored or none are.
    async fn bulk_create_documents(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<()>;

    async fn list_documents(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        params: &ListParams,
    ) -> Result<PagedResult<Document>>;

    async fn get_document_by_id(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
    ) -> Result<Document>;

    async fn query_documents(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        filter: &Filter,
        params: &ListParams,
    ) -> Result<PagedResult<Document>>;

    /// Merge `doc` into the stored document, field by field.
    async fn update_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<Document>;

    /// Add `delta` to a numeric field without reading it first.
    async fn increment_value(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<()>;

    /// Returns the number of removed documents (0 or 1).
    async fn delete_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
    ) -> Result<u64>;

    /// Non-unique index on `field`. Creating an existing index is a no-op.
    async fn create_index(&self, base: &str, collection: &str, field: &str) -> Result<()>;

    async fn list_collections(&self, base: &str) -> Result<Vec<String>>;
}

/// Scheduled task rows, read in bulk by the external scheduler.
#[async_trait]
pub trait TaskStore: TenantCatalog {
    async fn list_tasks_by_base(&self, base: &str) -> Result<Vec<Task>>;

    async fn add_task(&self, base: &str, task: Task) -> Result<Task>;

    async fn delete_task(&self, base: &str, id: &str) -> Result<()>;

    /// Tasks of every active base. The first failing base aborts the call.
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut results = Vec::new();
        for base in self.list_databases().await? {
            let tasks = self.list_tasks_by_base(&base.name).await?;
            results.extend(tasks);
        }
        Ok(results)
    }
}

/// Metadata of uploaded files. The bytes live in external object storage.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Returns the new file identifier.
    async fn add_file(&self, base: &str, file: File) -> Result<String>;

    async fn get_file_by_id(&self, base: &str, id: &str) -> Result<File>;

    async fn delete_file(&self, base: &str, id: &str) -> Result<()>;
}

/// Source and trigger metadata for user-authored functions.
#[async_trait]
pub trait FunctionStore: Send + Sync {
    /// Returns the new function identifier. Names are unique per base.
    async fn add_function(&self, base: &str, function: FunctionInfo) -> Result<String>;

    async fn update_function(&self, base: &str, id: &str, code: &str, trigger: &str)
        -> Result<()>;

    async fn get_function_by_name(&self, base: &str, name: &str) -> Result<FunctionInfo>;

    async fn list_functions(&self, base: &str) -> Result<Vec<FunctionInfo>>;

    async fn delete_function(&self, base: &str, name: &str) -> Result<()>;
}

/// The full operation contract a storage engine satisfies.
///
/// Implementations:
/// - `PostgresPersister`: one schema per base, JSONB documents
/// - `MongoPersister`: one database per base
/// - `MockPersister`: in-memory, for tests and local runs
#[async_trait]
pub trait Persister: TaskStore + DocumentStore + FileStore + FunctionStore {
    /// Name of the engine, for logs.
    fn backend_name(&self) -> &'static str;

    /// A fresh identifier usable as a primary key by this engine.
    fn new_id(&self) -> String {
        crate::id::new_id()
    }

    /// Round-trip to the engine.
    async fn ping(&self) -> Result<()>;

    /// Bring the catalog partition and every active base up to date.
    ///
    /// Engines without a schema return no reports.
    async fn migrate(&self) -> Result<Vec<MigrationReport>>;

    /// Release pooled connections.
    async fn close(&self);
}
