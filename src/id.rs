//! Identifier generation.
//!
//! Identifiers are UUIDv7 strings: globally unique, lexically sortable by
//! creation time, and usable as a primary key by every engine.

use uuid::Uuid;

use crate::interfaces::{Result, StorageError};

/// Generate a new identifier.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Longest identifier accepted from callers.
pub const MAX_ID_LEN: usize = 128;

/// Check the shape of a caller-supplied identifier.
///
/// Callers may supply their own identifiers at creation, so anything
/// non-empty, bounded and free of whitespace and control characters is
/// accepted. Unknown identifiers still surface as `NotFound`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id.len() > MAX_ID_LEN
        || id.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(StorageError::validation(format!(
            "invalid identifier '{}'",
            id
        )));
    }
    Ok(())
}
