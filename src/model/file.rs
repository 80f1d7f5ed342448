//! File and function metadata kept inside a tenant partition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of a file whose bytes live in external object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub id: String,
    pub account_id: String,
    pub key: String,
    pub url: String,
    pub size: i64,
    pub uploaded: DateTime<Utc>,
}

impl File {
    pub fn new(
        account_id: impl Into<String>,
        key: impl Into<String>,
        url: impl Into<String>,
        size: i64,
    ) -> Self {
        Self {
            id: String::new(),
            account_id: account_id.into(),
            key: key.into(),
            url: url.into(),
            size,
            uploaded: Utc::now(),
        }
    }
}

/// A user-authored function and the topic that triggers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub id: String,
    pub name: String,
    pub trigger_topic: String,
    pub code: String,
    pub version: i32,
    pub last_updated: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

impl FunctionInfo {
    pub fn new(
        name: impl Into<String>,
        trigger_topic: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            trigger_topic: trigger_topic.into(),
            code: code.into(),
            version: 1,
            last_updated: Utc::now(),
            last_run: None,
        }
    }
}
