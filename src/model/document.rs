//! Schema-less documents, listing parameters and paged results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user-defined JSON object.
pub type Document = Map<String, Value>;

/// Field carrying the document identifier.
pub const ID_FIELD: &str = "id";
/// Field carrying the owning account, stamped at creation.
pub const ACCOUNT_FIELD: &str = "accountId";

/// Default page size when the caller does not give one.
pub const DEFAULT_PAGE_SIZE: u32 = 25;
/// Upper bound on the page size.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Pagination and sort parameters. Pages are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListParams {
    pub page: u32,
    pub size: u32,
    pub sort_by: Option<String>,
    pub sort_descending: bool,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
            sort_by: None,
            sort_descending: false,
        }
    }
}

impl ListParams {
    pub fn page(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort_by = Some(field.into());
        self.sort_descending = descending;
        self
    }

    /// Page clamped to at least 1.
    pub fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    /// Size with 0 meaning the default, capped at [`MAX_PAGE_SIZE`].
    pub fn effective_size(&self) -> u32 {
        match self.size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }

    /// Number of documents to skip.
    pub fn skip(&self) -> u64 {
        u64::from(self.effective_page() - 1) * u64::from(self.effective_size())
    }

    /// Sort field, falling back to the identifier.
    pub fn sort_field(&self) -> &str {
        match self.sort_by.as_deref() {
            Some(field) if !field.is_empty() => field,
            _ => ID_FIELD,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub page: u32,
    pub size: u32,
    pub total: u64,
    pub results: Vec<T>,
}

impl<T> PagedResult<T> {
    pub fn new(params: &ListParams, total: u64, results: Vec<T>) -> Self {
        Self {
            page: params.effective_page(),
            size: params.effective_size(),
            total,
            results,
        }
    }
}

/// Read the identifier of a stored document.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}
