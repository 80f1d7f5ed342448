//! Shared storage helper functions.
//!
//! Name validation, ownership stamping and change-event emission used by
//! every engine, so each one applies the same rules before touching its
//! native driver.

use serde_json::Value;
use tracing::warn;

use crate::id::{new_id, validate_id};
use crate::interfaces::{ChangePublisher, EventKind, Result, StorageError};
use crate::model::{Document, ListParams, Principal, ACCOUNT_FIELD, ID_FIELD};
use crate::query::validate_field;

/// Prefix of collections owned by the system inside a base.
pub const RESERVED_PREFIX: &str = "sb_";
pub const TASKS_COLLECTION: &str = "sb_tasks";
pub const FILES_COLLECTION: &str = "sb_files";
pub const FUNCTIONS_COLLECTION: &str = "sb_functions";
pub const MIGRATIONS_TABLE: &str = "sb_migrations";

/// Longest base or collection name; the PostgreSQL identifier limit.
pub const MAX_NAME_LEN: usize = 63;

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && name.len() <= MAX_NAME_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Database and schema names owned by the engines themselves.
const SYSTEM_PARTITIONS: &[&str] = &["admin", "config", "local", "public", "information_schema"];

/// A base name becomes a database or schema name.
pub fn validate_base_name(name: &str) -> Result<()> {
    if !is_valid_name(name) {
        return Err(StorageError::validation(format!(
            "invalid base name '{}': expected [a-z][a-z0-9_]*, at most {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if SYSTEM_PARTITIONS.contains(&name) || name.starts_with("pg_") {
        return Err(StorageError::validation(format!(
            "base name '{}' is reserved",
            name
        )));
    }
    Ok(())
}

/// A base must not share its partition with the catalog.
pub fn validate_new_base(name: &str, catalog: &str) -> Result<()> {
    validate_base_name(name)?;
    if name == catalog {
        return Err(StorageError::validation(format!(
            "base name '{}' is reserved",
            name
        )));
    }
    Ok(())
}

/// A user collection name becomes a table or collection name.
pub fn validate_collection(name: &str) -> Result<()> {
    if !is_valid_name(name) {
        return Err(StorageError::validation(format!(
            "invalid collection name '{}': expected [a-z][a-z0-9_]*, at most {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if is_reserved(name) {
        return Err(StorageError::validation(format!(
            "collection name '{}' is reserved",
            name
        )));
    }
    Ok(())
}

pub fn is_reserved(collection: &str) -> bool {
    collection.starts_with(RESERVED_PREFIX)
}

/// Validate the (base, collection) pair addressed by a document operation.
pub fn validate_target(base: &str, collection: &str) -> Result<()> {
    validate_base_name(base)?;
    validate_collection(collection)
}

/// The sort field must be addressable like a filter field.
pub fn validate_list_params(params: &ListParams) -> Result<()> {
    validate_field(params.sort_field())
}

/// Field targeted by an increment: a top-level data field.
pub fn validate_increment_field(field: &str) -> Result<()> {
    validate_field(field)?;
    if field.contains('.') {
        return Err(StorageError::validation(format!(
            "increment target '{}' must be a top-level field",
            field
        )));
    }
    if field == ID_FIELD || field == ACCOUNT_FIELD {
        return Err(StorageError::validation(format!(
            "field '{}' cannot be incremented",
            field
        )));
    }
    Ok(())
}

/// Top-level keys are stored literally by every engine, so none may be
/// empty, contain `.` or start with `$`.
pub fn validate_document_keys(doc: &Document) -> Result<()> {
    match doc
        .keys()
        .find(|key| key.is_empty() || key.contains('.') || key.starts_with('$'))
    {
        Some(key) => Err(StorageError::validation(format!(
            "invalid document key '{}': keys must be non-empty without '.' or a leading '$'",
            key
        ))),
        None => Ok(()),
    }
}

/// Assign the identifier and owner of a new document.
///
/// A caller-supplied string `id` is kept; otherwise a new one is generated.
/// `accountId` always comes from the principal.
pub fn prepare_new_document(auth: &Principal, mut doc: Document) -> Result<(String, Document)> {
    validate_document_keys(&doc)?;
    let id = match doc.get(ID_FIELD) {
        None | Some(Value::Null) => new_id(),
        Some(Value::String(id)) => {
            validate_id(id)?;
            id.clone()
        }
        Some(other) => {
            return Err(StorageError::validation(format!(
                "document id must be a string, got {}",
                other
            )))
        }
    };

    doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
    doc.insert(
        ACCOUNT_FIELD.to_string(),
        Value::String(auth.account_id.clone()),
    );
    Ok((id, doc))
}

/// Drop the immutable system fields from an update.
pub fn sanitize_update(mut doc: Document) -> Result<Document> {
    validate_document_keys(&doc)?;
    doc.remove(ID_FIELD);
    doc.remove(ACCOUNT_FIELD);
    Ok(doc)
}

/// Channel carrying the change events of one collection.
pub fn channel_for(collection: &str) -> String {
    format!("db-{}", collection)
}

/// Emit a change event. Failures are logged, never returned.
pub fn publish_document_event(
    publisher: &dyn ChangePublisher,
    collection: &str,
    kind: EventKind,
    payload: Value,
) {
    let channel = channel_for(collection);
    if let Err(e) = publisher.publish(&channel, kind, payload) {
        warn!(channel = %channel, kind = %kind, error = %e, "Failed to publish change event");
    }
}
