//! Scheduled task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of scheduled work owned by one base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub value: String,
    pub meta: Value,
    pub interval: String,
    pub last_run: Option<DateTime<Utc>>,
    /// Name of the owning base, filled on read.
    #[serde(default)]
    pub base_name: String,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        task_type: impl Into<String>,
        value: impl Into<String>,
        interval: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            task_type: task_type.into(),
            value: value.into(),
            meta: Value::Null,
            interval: interval.into(),
            last_run: None,
            base_name: String::new(),
        }
    }
}
