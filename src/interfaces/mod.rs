//! Abstract interfaces for tenantstore components.
//!
//! These traits define the contracts for:
//! - Tenant catalog (customers, bases, provisioning)
//! - Document storage inside a tenant partition
//! - Scheduled tasks, file metadata, function metadata
//! - Change notification after document mutations

pub mod persister;
pub mod publisher;

pub use persister::{
    DocumentStore, ErrorKind, FileStore, FunctionStore, Persister, Result, StorageError,
    TaskStore, TenantCatalog,
};
pub use publisher::{ChangeEvent, ChangePublisher, EventKind, PublishError};
