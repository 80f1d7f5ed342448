//! Authenticated caller identity, produced by the auth layer.

use serde::{Deserialize, Serialize};

/// Role at and above which a principal sees every document of its base.
pub const ROOT_ROLE: i32 = 100;

/// Opaque caller identity passed through to storage for ownership scoping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub account_id: String,
    pub user_id: String,
    pub email: String,
    pub role: i32,
}

impl Principal {
    pub fn new(
        account_id: impl Into<String>,
        user_id: impl Into<String>,
        email: impl Into<String>,
        role: i32,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            user_id: user_id.into(),
            email: email.into(),
            role,
        }
    }

    /// Account filter applied to reads and writes, `None` for root principals.
    pub fn scope(&self) -> Option<&str> {
        if self.role >= ROOT_ROLE {
            None
        } else {
            Some(&self.account_id)
        }
    }
}
